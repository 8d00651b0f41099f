use std::collections::BTreeMap;

use crate::ResultValue;

/// Appends one `put` line for a data point.
///
/// Returns `false` (leaving `buf` untouched) when the value cannot be sent as a number.
pub(crate) fn write_put(
    buf: &mut String,
    metric: &str,
    epoch_seconds: u128,
    value: &ResultValue,
    host_tag: &str,
    tags: &BTreeMap<String, String>,
) -> bool {
    let Some(value) = numeric(value) else {
        return false;
    };

    buf.push_str("put ");
    push_sanitized(buf, metric);
    buf.push_str(&format!(" {epoch_seconds} {value}"));
    write_tag(buf, "host", host_tag);
    for (key, value) in tags.iter().filter(|(key, _)| key.as_str() != "host") {
        write_tag(buf, key, value);
    }
    buf.push('\n');

    true
}

fn numeric(value: &ResultValue) -> Option<String> {
    match value {
        ResultValue::Integer(v) => Some(v.to_string()),
        ResultValue::Float(v) if v.is_finite() => Some(v.to_string()),
        ResultValue::Float(_) => None,
        ResultValue::Boolean(v) => Some(if *v { "1" } else { "0" }.to_string()),
        ResultValue::Text(v) => {
            let trimmed = v.trim();

            trimmed
                .parse::<f64>()
                .is_ok_and(f64::is_finite)
                .then(|| trimmed.to_string())
        }
    }
}

fn write_tag(buf: &mut String, key: &str, value: &str) {
    buf.push(' ');
    push_sanitized(buf, key);
    buf.push('=');
    push_sanitized(buf, value);
}

/// OpenTSDB accepts `[A-Za-z0-9-_./]` in metric names and tags.
fn push_sanitized(buf: &mut String, s: &str) {
    for c in s.chars() {
        match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' | '/' => buf.push(c),
            _ => buf.push('_'),
        }
    }
}

#[cfg(test)]
mod tests {
    use expect_test::expect;

    use super::*;

    fn empty_tags() -> BTreeMap<String, String> {
        BTreeMap::new()
    }

    fn put(metric: &str, value: ResultValue, tags: &BTreeMap<String, String>) -> String {
        let mut buf = String::new();
        write_put(&mut buf, metric, 1_700_000_000, &value, "server01", tags);

        buf
    }

    #[test]
    fn integer() {
        expect!["put jvm.threads 1700000000 42 host=server01\n"]
            .assert_eq(&put("jvm.threads", ResultValue::Integer(42), &empty_tags()));
    }

    #[test]
    fn float() {
        expect!["put jvm.load 1700000000 0.25 host=server01\n"]
            .assert_eq(&put("jvm.load", ResultValue::Float(0.25), &empty_tags()));
    }

    #[test]
    fn boolean() {
        expect!["put jvm.verbose 1700000000 1 host=server01\n"]
            .assert_eq(&put("jvm.verbose", ResultValue::Boolean(true), &empty_tags()));
    }

    #[test]
    fn numeric_text() {
        expect!["put X-DOMAIN.PKG.CLASS-X.X-ATT-X 1700000000 120021 host=server01\n"].assert_eq(
            &put("X-DOMAIN.PKG.CLASS-X.X-ATT-X", ResultValue::Text(" 120021 ".into()), &empty_tags()),
        );
    }

    #[test]
    fn non_numeric_skipped() {
        expect![""].assert_eq(&put("jvm.name", ResultValue::Text("HotSpot".into()), &empty_tags()));
        expect![""].assert_eq(&put("jvm.nan", ResultValue::Float(f64::NAN), &empty_tags()));
    }

    #[test]
    fn extra_tags_sorted_after_host() {
        let tags = BTreeMap::from_iter([
            ("region".to_string(), "us-east".to_string()),
            ("env".to_string(), "prod".to_string()),
            ("host".to_string(), "ignored".to_string()),
        ]);

        expect!["put m 1700000000 1 host=server01 env=prod region=us-east\n"]
            .assert_eq(&put("m", ResultValue::Integer(1), &tags));
    }

    #[test]
    fn sanitizes_names_and_tags() {
        let tags = BTreeMap::from_iter([("data center".to_string(), "eu=1,a".to_string())]);

        expect!["put java.lang.name__PS_Scavenge_Count_ 1700000000 3 host=server01 data_center=eu_1_a\n"]
            .assert_eq(&put("java.lang.name__PS Scavenge:Count?", ResultValue::Integer(3), &tags));
    }
}
