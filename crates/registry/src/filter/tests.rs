use pretty_assertions::assert_eq;
use rstest::rstest;

use super::*;
use crate::{Properties, PropertyValue};

fn sample() -> Properties {
	Properties::new()
		.with(keys::OBJECTCLASS, vec![PropertyValue::from("Greeter"), PropertyValue::from("Named")])
		.with("lang", "en-GB")
		.with("Weight", 10)
		.with("ratio", 0.75)
		.with("enabled", true)
		.with("path", "/usr/local/bin")
		.with("tags", vec![PropertyValue::from("fast"), PropertyValue::from("safe")])
		.with("odd", "a(b)*c")
}

#[rstest]
#[case::equal("(lang=en-GB)", true)]
#[case::equal_is_case_sensitive_on_value("(lang=en-gb)", false)]
#[case::attribute_case_insensitive("(LANG=en-GB)", true)]
#[case::approx_ignores_case_and_space("(lang~= EN-gb )", true)]
#[case::objectclass_list("(objectclass=Named)", true)]
#[case::objectclass_missing("(objectclass=Other)", false)]
#[case::int_ge("(weight>=10)", true)]
#[case::int_le("(weight<=9)", false)]
#[case::int_not_a_number("(weight=ten)", false)]
#[case::float_ge("(ratio>=0.5)", true)]
#[case::bool_equal("(enabled=TRUE)", true)]
#[case::bool_ordering_never_matches("(enabled>=false)", false)]
#[case::present("(path=*)", true)]
#[case::absent("(missing=*)", false)]
#[case::substring_initial("(path=/usr*)", true)]
#[case::substring_any_last("(path=*local*bin)", true)]
#[case::substring_order_matters("(path=*bin*local*)", false)]
#[case::substring_on_list("(tags=sa*)", true)]
#[case::escaped_value("(odd=a\\(b\\)\\*c)", true)]
#[case::and("(&(lang=en-GB)(weight>=5))", true)]
#[case::or("(|(lang=fr)(weight<=5))", false)]
#[case::not("(!(lang=fr))", true)]
#[case::whitespace_between("( & (lang=en-GB) (enabled=true) )", true)]
fn evaluates(#[case] src: &str, #[case] expected: bool) {
	let filter = Filter::parse(src).unwrap();
	assert_eq!(filter.matches(&sample()), expected, "{src}");
}

#[rstest]
#[case::empty("", FilterError::UnexpectedEnd)]
#[case::unclosed("(a=b", FilterError::UnexpectedEnd)]
#[case::missing_paren("a=b", FilterError::Unexpected { pos: 0, found: 'a' })]
#[case::empty_attr("(=b)", FilterError::EmptyAttribute { pos: 1 })]
#[case::trailing("(a=b)x", FilterError::TrailingInput { pos: 5 })]
#[case::bare_paren_in_value("(a=b(c)", FilterError::Unexpected { pos: 4, found: '(' })]
#[case::empty_and("(&)", FilterError::Unexpected { pos: 2, found: ')' })]
#[case::bad_operator("(a~b)", FilterError::Unexpected { pos: 3, found: 'b' })]
#[case::dangling_escape("(a=b\\", FilterError::UnexpectedEnd)]
fn rejects(#[case] src: &str, #[case] expected: FilterError) {
	assert_eq!(Filter::parse(src), Err(expected));
}

#[test]
fn substring_shape() {
	assert_eq!(
		Filter::parse("(name=a*b**c*)").unwrap(),
		Filter::Substring {
			attr: "name".into(),
			initial: Some("a".into()),
			any: vec!["b".into(), "c".into()],
			last: None,
		}
	);
	assert_eq!(Filter::parse("(name=*)").unwrap(), Filter::Present("name".into()));
}

#[test]
fn star_is_literal_outside_equality() {
	let filter = Filter::parse("(name>=a*)").unwrap();
	assert_eq!(
		filter,
		Filter::Compare {
			attr: "name".into(),
			op: CompareOp::GreaterEq,
			value: "a*".into(),
		}
	);
}

#[rstest]
#[case("(&(objectclass=Greeter)(!(lang=fr)))")]
#[case("(|(path=/usr*bin)(odd=a\\(b\\)\\*c)(x~=y)(n<=3))")]
#[case("(tags=*)")]
fn display_reparses_to_the_same_filter(#[case] src: &str) {
	let filter: Filter = src.parse().unwrap();
	let rendered = filter.to_string();
	assert_eq!(Filter::parse(&rendered).unwrap(), filter);
}

#[test]
fn for_interface_combines_target() {
	let plain = Filter::for_interface("Greeter", None).unwrap();
	assert_eq!(plain.to_string(), "(objectclass=Greeter)");

	let targeted = Filter::for_interface("Greeter", Some(" (lang=en-GB) ")).unwrap();
	assert_eq!(targeted.to_string(), "(&(objectclass=Greeter)(lang=en-GB))");
	assert!(targeted.matches(&sample()));

	assert_eq!(Filter::for_interface("Greeter", Some("")).unwrap(), plain);
	assert!(Filter::for_interface("Greeter", Some("(broken")).is_err());
}
