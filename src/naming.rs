use crate::ObjectName;

/// Turns a matched object and attribute into a metric name.
pub trait ResultNameStrategy: Send + Sync {
    fn resolve_name(&self, object_name: &ObjectName, attribute: &str, alias: Option<&str>) -> String;
}

/// Names results `<alias>.<attribute>`, or, without an alias,
/// `<domain>.<key>__<value>[.<key>__<value>...].<attribute>` with keys in sorted order.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultNameStrategy;

impl ResultNameStrategy for DefaultNameStrategy {
    fn resolve_name(&self, object_name: &ObjectName, attribute: &str, alias: Option<&str>) -> String {
        let mut name = String::new();

        match alias {
            Some(alias) => name.push_str(alias),
            None => {
                push_escaped(&mut name, object_name.domain(), false);
                for (key, value) in object_name.properties() {
                    name.push('.');
                    push_escaped(&mut name, key, true);
                    name.push_str("__");
                    push_escaped(&mut name, value, true);
                }
            }
        }

        name.push('.');
        push_escaped(&mut name, attribute, false);

        name
    }
}

/// Appends `s`, replacing anything but letters, digits and `-` with `_`.
///
/// Quotes wrapping the whole value are dropped.
fn push_escaped(buf: &mut String, s: &str, escape_dot: bool) {
    let last = s.chars().count().saturating_sub(1);

    for (i, c) in s.chars().enumerate() {
        match c {
            c if c.is_alphanumeric() || c == '-' => buf.push(c),
            '.' => buf.push(if escape_dot { '_' } else { '.' }),
            '"' if i == 0 || i == last => {}
            _ => buf.push('_'),
        }
    }
}
