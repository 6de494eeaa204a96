//! printf-style message formatting for the Log Console.
//!
//! Mirrors the `console.log`-style formatting rule in spec.md §4.5: `%s %d
//! %i %f %o %O %c` specifiers on the first argument consume subsequent
//! arguments; anything left over is space-joined; objects render as
//! JSON-pretty inside a `<pre>` block; all text output is HTML-escaped with
//! `\n` becoming `<br>`.

use serde_json::Value;

const SPECIFIERS: &str = "sdifoOc";

pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            '`' => out.push_str("&#96;"),
            _ => out.push(c),
        }
    }
    out
}

fn escape_and_br(s: &str) -> String {
    escape_html(s).replace('\n', "<br>")
}

/// Render one value the way it appears when it was *not* consumed by a
/// format specifier: objects/arrays get JSON-pretty in a `<pre>` block,
/// everything else is displayed as text.
fn render_token(value: &Value) -> String {
    match value {
        Value::Object(_) | Value::Array(_) => {
            let pretty = serde_json::to_string_pretty(value).unwrap_or_default();
            format!("<pre>{}</pre>", escape_and_br(&pretty))
        }
        Value::String(s) => escape_and_br(s),
        other => escape_and_br(&other.to_string()),
    }
}

fn render_specifier(spec: char, value: Option<&Value>) -> String {
    match spec {
        's' => {
            let text = match value {
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => String::new(),
            };
            escape_and_br(&text)
        }
        'd' | 'i' => match value.and_then(Value::as_f64) {
            Some(f) => (f.trunc() as i64).to_string(),
            None => "NaN".to_owned(),
        },
        'f' => match value.and_then(Value::as_f64) {
            Some(f) => f.to_string(),
            None => "NaN".to_owned(),
        },
        'o' | 'O' => {
            let text = value
                .map(|v| serde_json::to_string(v).unwrap_or_default())
                .unwrap_or_default();
            escape_and_br(&text)
        }
        // %c consumes one argument as a CSS style hook and emits nothing.
        'c' => String::new(),
        _ => unreachable!("caller only passes characters from SPECIFIERS"),
    }
}

/// Format an argument list into the Console's HTML-escaped message body.
pub fn format_message(args: &[Value]) -> String {
    let Some(first) = args.first() else {
        return String::new();
    };

    let Value::String(fmt) = first else {
        return args.iter().map(render_token).collect::<Vec<_>>().join(" ");
    };

    if !contains_specifier(fmt) {
        return args.iter().map(render_token).collect::<Vec<_>>().join(" ");
    }

    let mut out = String::new();
    let mut arg_idx = 1usize;
    let mut chars = fmt.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '%' {
            if let Some(&next) = chars.peek() {
                if SPECIFIERS.contains(next) {
                    chars.next();
                    let value = args.get(arg_idx);
                    arg_idx += 1;
                    out.push_str(&render_specifier(next, value));
                    continue;
                }
            }
            out.push('%');
        } else {
            out.push_str(&escape_and_br(&c.to_string()));
        }
    }

    if arg_idx < args.len() {
        out.push(' ');
        out.push_str(
            &args[arg_idx..]
                .iter()
                .map(render_token)
                .collect::<Vec<_>>()
                .join(" "),
        );
    }

    out
}

fn contains_specifier(fmt: &str) -> bool {
    let mut chars = fmt.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '%' {
            if let Some(&next) = chars.peek() {
                if SPECIFIERS.contains(next) {
                    return true;
                }
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plain_args_are_space_joined_and_escaped() {
        let out = format_message(&[json!("hello"), json!("<world>")]);
        assert_eq!(out, "hello &lt;world&gt;");
    }

    #[test]
    fn string_specifier_substitutes_and_escapes() {
        let out = format_message(&[json!("name: %s"), json!("<script>")]);
        assert_eq!(out, "name: &lt;script&gt;");
    }

    #[test]
    fn integer_specifiers_truncate() {
        let out = format_message(&[json!("n=%d i=%i"), json!(3.9), json!(-2.1)]);
        assert_eq!(out, "n=3 i=-2");
    }

    #[test]
    fn float_specifier_keeps_fraction() {
        let out = format_message(&[json!("pi=%f"), json!(3.25)]);
        assert_eq!(out, "pi=3.25");
    }

    #[test]
    fn c_specifier_consumes_arg_silently() {
        let out = format_message(&[json!("styled%ctext"), json!("color:red")]);
        assert_eq!(out, "styledtext");
    }

    #[test]
    fn leftover_args_are_appended_space_joined() {
        let out = format_message(&[json!("hi %s"), json!("bob"), json!("extra")]);
        assert_eq!(out, "hi bob extra");
    }

    #[test]
    fn object_args_render_as_pretty_json_in_pre() {
        let out = format_message(&[json!({"a": 1})]);
        assert!(out.starts_with("<pre>"));
        assert!(out.ends_with("</pre>"));
        assert!(out.contains("&quot;a&quot;"));
    }

    #[test]
    fn newline_becomes_br() {
        let out = format_message(&[json!("line1\nline2")]);
        assert_eq!(out, "line1<br>line2");
    }

    #[test]
    fn empty_args_yield_empty_string() {
        assert_eq!(format_message(&[]), "");
    }
}
