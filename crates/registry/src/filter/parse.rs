use super::{CompareOp, Filter, FilterError};

/// Recursive-descent parser over the filter bytes.
///
/// Every syntactic delimiter is ASCII, so walking bytes never splits a
/// multi-byte character at a point where one is inspected.
pub(super) struct Parser<'a> {
	src: &'a str,
	bytes: &'a [u8],
	pos: usize,
}

type Result<T> = std::result::Result<T, FilterError>;

impl<'a> Parser<'a> {
	pub(super) fn new(src: &'a str) -> Self {
		Self {
			src,
			bytes: src.as_bytes(),
			pos: 0,
		}
	}

	pub(super) fn parse_root(mut self) -> Result<Filter> {
		let filter = self.parse_filter()?;
		self.skip_ws();
		if self.pos < self.bytes.len() {
			return Err(FilterError::TrailingInput { pos: self.pos });
		}
		Ok(filter)
	}

	fn parse_filter(&mut self) -> Result<Filter> {
		self.skip_ws();
		self.expect(b'(')?;
		self.skip_ws();
		let filter = match self.peek() {
			None => return Err(FilterError::UnexpectedEnd),
			Some(b'&') => {
				self.pos += 1;
				Filter::And(self.parse_list()?)
			}
			Some(b'|') => {
				self.pos += 1;
				Filter::Or(self.parse_list()?)
			}
			Some(b'!') => {
				self.pos += 1;
				Filter::Not(Box::new(self.parse_filter()?))
			}
			Some(_) => self.parse_item()?,
		};
		self.skip_ws();
		self.expect(b')')?;
		Ok(filter)
	}

	fn parse_list(&mut self) -> Result<Vec<Filter>> {
		let mut items = Vec::new();
		loop {
			self.skip_ws();
			match self.peek() {
				Some(b'(') => items.push(self.parse_filter()?),
				Some(_) if !items.is_empty() => return Ok(items),
				Some(_) => return Err(self.unexpected()),
				None => return Err(FilterError::UnexpectedEnd),
			}
		}
	}

	fn parse_item(&mut self) -> Result<Filter> {
		let start = self.pos;
		while let Some(b) = self.peek() {
			match b {
				b'=' | b'~' | b'<' | b'>' => break,
				b'(' | b')' => return Err(self.unexpected()),
				_ => self.pos += 1,
			}
		}
		let attr = self.src.get(start..self.pos).unwrap_or_default().trim();
		if self.peek().is_none() {
			return Err(FilterError::UnexpectedEnd);
		}
		if attr.is_empty() {
			return Err(FilterError::EmptyAttribute { pos: start });
		}

		let op = match self.peek() {
			Some(b'=') => {
				self.pos += 1;
				CompareOp::Equal
			}
			Some(b) => {
				let op = match b {
					b'~' => CompareOp::Approx,
					b'<' => CompareOp::LessEq,
					_ => CompareOp::GreaterEq,
				};
				self.pos += 1;
				self.expect(b'=')?;
				op
			}
			None => return Err(FilterError::UnexpectedEnd),
		};

		let segments = self.parse_value(op == CompareOp::Equal)?;
		Ok(build_item(attr, op, segments))
	}

	/// Reads a value up to the closing paren. Splits on unescaped `*` when
	/// `wildcards` is set; otherwise `*` is literal.
	fn parse_value(&mut self, wildcards: bool) -> Result<Vec<String>> {
		let mut segments = Vec::new();
		let mut current = Vec::new();
		loop {
			match self.peek() {
				None => return Err(FilterError::UnexpectedEnd),
				Some(b')') => break,
				Some(b'(') => return Err(self.unexpected()),
				Some(b'\\') => {
					self.pos += 1;
					let Some(escaped) = self.peek() else {
						return Err(FilterError::UnexpectedEnd);
					};
					current.push(escaped);
					self.pos += 1;
				}
				Some(b'*') if wildcards => {
					segments.push(into_string(std::mem::take(&mut current)));
					self.pos += 1;
				}
				Some(b) => {
					current.push(b);
					self.pos += 1;
				}
			}
		}
		segments.push(into_string(current));
		Ok(segments)
	}

	fn peek(&self) -> Option<u8> {
		self.bytes.get(self.pos).copied()
	}

	fn expect(&mut self, want: u8) -> Result<()> {
		match self.peek() {
			Some(b) if b == want => {
				self.pos += 1;
				Ok(())
			}
			Some(_) => Err(self.unexpected()),
			None => Err(FilterError::UnexpectedEnd),
		}
	}

	fn skip_ws(&mut self) {
		while self.peek().is_some_and(|b| b.is_ascii_whitespace()) {
			self.pos += 1;
		}
	}

	fn unexpected(&self) -> FilterError {
		let found = self
			.src
			.get(self.pos..)
			.and_then(|rest| rest.chars().next())
			.unwrap_or(char::REPLACEMENT_CHARACTER);
		FilterError::Unexpected { pos: self.pos, found }
	}
}

fn into_string(bytes: Vec<u8>) -> String {
	String::from_utf8(bytes).unwrap_or_else(|err| String::from_utf8_lossy(err.as_bytes()).into_owned())
}

fn build_item(attr: &str, op: CompareOp, mut segments: Vec<String>) -> Filter {
	let attr: Box<str> = attr.into();
	if segments.len() == 1 {
		let value = segments.pop().unwrap_or_default();
		return Filter::Compare {
			attr,
			op,
			value: value.into(),
		};
	}
	if segments.len() == 2 && segments.iter().all(String::is_empty) {
		return Filter::Present(attr);
	}

	let last = segments.pop().filter(|s| !s.is_empty()).map(Into::into);
	let mut rest = segments.into_iter();
	let initial = rest.next().filter(|s| !s.is_empty()).map(Into::into);
	let any = rest.filter(|s| !s.is_empty()).map(Into::into).collect();
	Filter::Substring { attr, initial, any, last }
}
