use memchr::memchr;

/// The `name` and `filename` parameters of a `Content-Disposition` value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ContentDisposition {
    pub(crate) name: Option<String>,
    pub(crate) file_name: Option<String>,
}

impl ContentDisposition {
    pub(crate) fn parse(value: &str) -> ContentDisposition {
        ContentDisposition {
            name: find_param(value, "name", false).map(|name| name.to_owned()),
            file_name: find_param(value, "filename", true).map(normalize_file_name),
        }
    }
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

fn is_token_char(ch: char) -> bool {
    !matches!(
        ch,
        '(' | ')' | '<' | '>' | '@' | ',' | ';' | ':' | '\\' | '"' | '/' | '[' | ']' | '?' | '=' | '{' | '}'
    ) && !ch.is_whitespace()
}

/// Finds the first `key=` parameter that starts on a word boundary and carries
/// a quoted string or a token.
///
/// With `terminated`, the value must be followed by the end of the input or
/// `;`, and a quoted value extends to the first quote satisfying that.
fn find_param<'a>(value: &'a str, key: &str, terminated: bool) -> Option<&'a str> {
    let bytes = value.as_bytes();
    let key_len = key.len();
    let mut from = 0;

    while from + key_len < bytes.len() {
        let pos = from;
        from += 1;

        if !bytes[pos..pos + key_len].eq_ignore_ascii_case(key.as_bytes()) || bytes[pos + key_len] != b'=' {
            continue;
        }
        if pos > 0 && is_word_byte(bytes[pos - 1]) {
            continue;
        }

        let start = pos + key_len + 1;
        let rest = &value[start..];

        if rest.starts_with('"') {
            if let Some(found) = quoted_value(&rest[1..], terminated) {
                return Some(found);
            }
            continue;
        }

        let token_len = rest
            .char_indices()
            .find(|(_, ch)| !is_token_char(*ch))
            .map(|(idx, _)| idx)
            .unwrap_or(rest.len());

        if token_len == 0 {
            continue;
        }
        if terminated && !is_terminator(&rest[token_len..]) {
            continue;
        }

        return Some(&rest[..token_len]);
    }

    None
}

fn quoted_value(rest: &str, terminated: bool) -> Option<&str> {
    let bytes = rest.as_bytes();
    let mut offset = 0;

    while let Some(rel) = memchr(b'"', &bytes[offset..]) {
        let end = offset + rel;
        if !terminated || is_terminator(&rest[end + 1..]) {
            return Some(&rest[..end]);
        }
        offset = end + 1;
    }

    None
}

fn is_terminator(rest: &str) -> bool {
    rest.is_empty() || rest.starts_with(';')
}

/// Keeps the last path segment of a file name and decodes the `%22` and
/// `&#dddd;` escapes browsers use for quotes and non-latin characters.
fn normalize_file_name(raw: &str) -> String {
    let normalized = raw.replace('\\', "/");
    let last = normalized.rsplit('/').next().unwrap_or_default();
    decode_numeric_entities(&last.replace("%22", "\""))
}

fn decode_numeric_entities(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(pos) = rest.find("&#") {
        out.push_str(&rest[..pos]);
        let candidate = &rest[pos..];
        let digits = candidate.as_bytes().get(2..6);
        let closed = candidate.as_bytes().get(6) == Some(&b';');

        match digits {
            Some(digits) if closed && digits.iter().all(u8::is_ascii_digit) => {
                let code = digits.iter().fold(0u32, |acc, d| acc * 10 + u32::from(d - b'0'));
                match char::from_u32(code) {
                    Some(ch) => out.push(ch),
                    None => out.push_str(&candidate[..7]),
                }
                rest = &candidate[7..];
            }
            _ => {
                out.push_str("&#");
                rest = &candidate[2..];
            }
        }
    }

    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(val: &str) -> ContentDisposition {
        ContentDisposition::parse(val)
    }

    #[test]
    fn test_content_disposition_name() {
        let cd = parse(r#"form-data; name="my_field""#);
        assert_eq!(cd.name.as_deref(), Some("my_field"));
        assert_eq!(cd.file_name, None);

        let cd = parse(r#"form-data; name="my field"; filename="file abc.txt""#);
        assert_eq!(cd.name.as_deref(), Some("my field"));
        assert_eq!(cd.file_name.as_deref(), Some("file abc.txt"));

        let cd = parse("form-data; name=\"你好\"; filename=\"file abc.txt\"");
        assert_eq!(cd.name.as_deref(), Some("你好"));

        let cd = parse("form-data; name=plain_token; other=1");
        assert_eq!(cd.name.as_deref(), Some("plain_token"));

        let cd = parse(r#"form-data; NAME="upper""#);
        assert_eq!(cd.name.as_deref(), Some("upper"));

        let cd = parse(r#"form-data; name="""#);
        assert_eq!(cd.name.as_deref(), Some(""));
    }

    #[test]
    fn test_filename_is_not_a_name() {
        let cd = parse(r#"form-data; filename="file-name.txt""#);
        assert_eq!(cd.name, None);
        assert_eq!(cd.file_name.as_deref(), Some("file-name.txt"));
    }

    #[test]
    fn test_content_disposition_file_name() {
        let cd = parse(r#"form-data; name="my_field"; filename="file_name.txt""#);
        assert_eq!(cd.file_name.as_deref(), Some("file_name.txt"));

        let cd = parse("form-data; filename=\"কখগ-你好.txt\"");
        assert_eq!(cd.file_name.as_deref(), Some("কখগ-你好.txt"));

        let cd = parse("form-data; filename=token.txt; name=x");
        assert_eq!(cd.file_name.as_deref(), Some("token.txt"));
        assert_eq!(cd.name.as_deref(), Some("x"));

        let cd = parse("form-data; filename=token.txt extra");
        assert_eq!(cd.file_name, None);
    }

    #[test]
    fn test_file_name_path_segments() {
        let cd = parse(r#"form-data; name="f"; filename="C:\Users\joe\report.pdf""#);
        assert_eq!(cd.file_name.as_deref(), Some("report.pdf"));

        let cd = parse(r#"form-data; name="f"; filename="/tmp/uploads/a.png""#);
        assert_eq!(cd.file_name.as_deref(), Some("a.png"));
    }

    #[test]
    fn test_file_name_quote_must_terminate() {
        let cd = parse(r#"form-data; filename="say "hi".txt"; name="f""#);
        assert_eq!(cd.file_name.as_deref(), Some("say \"hi\".txt"));
    }

    #[test]
    fn test_file_name_escapes() {
        let cd = parse(r#"form-data; filename="%22quoted%22.txt""#);
        assert_eq!(cd.file_name.as_deref(), Some("\"quoted\".txt"));

        let cd = parse(r#"form-data; filename="&#1092;&#1072;.txt""#);
        assert_eq!(cd.file_name.as_deref(), Some("фа.txt"));

        let cd = parse(r#"form-data; filename="&#0065;&#65;&#12345;.txt""#);
        assert_eq!(cd.file_name.as_deref(), Some("A&#65;&#12345;.txt"));
    }
}
