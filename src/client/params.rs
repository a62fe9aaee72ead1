//! Query string serialization in the style of `qs.stringify`.

use serde_json::Value;
use url::Url;

/// How arrays are written into the query string.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ArrayFormat {
    /// `ids[0]=1&ids[1]=2`
    #[default]
    Indices,
    /// `ids[]=1&ids[]=2`
    Brackets,
    /// `ids=1&ids=2`
    Repeat,
    /// `ids=1,2`
    Comma,
}

/// Flatten `params` into `(key, value)` pairs. Nulls are skipped, nested
/// objects use `outer[inner]` keys.
#[must_use]
pub fn to_pairs(params: &Value, format: ArrayFormat) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    if let Value::Object(map) = params {
        for (key, value) in map {
            flatten(key, value, format, &mut pairs);
        }
    }
    pairs
}

/// Append `params` to the query string of `url`.
pub fn append(url: &mut Url, params: &Value, format: ArrayFormat) {
    let pairs = to_pairs(params, format);
    if pairs.is_empty() {
        return;
    }
    let mut query = url.query_pairs_mut();
    for (key, value) in &pairs {
        query.append_pair(key, value);
    }
}

fn flatten(key: &str, value: &Value, format: ArrayFormat, pairs: &mut Vec<(String, String)>) {
    match value {
        Value::Null => {}
        Value::Object(map) => {
            for (inner, value) in map {
                flatten(&format!("{key}[{inner}]"), value, format, pairs);
            }
        }
        Value::Array(items) => match format {
            ArrayFormat::Comma => {
                let joined: Vec<String> = items.iter().filter_map(scalar).collect();
                pairs.push((key.to_string(), joined.join(",")));
            }
            ArrayFormat::Indices => {
                for (index, item) in items.iter().enumerate() {
                    flatten(&format!("{key}[{index}]"), item, format, pairs);
                }
            }
            ArrayFormat::Brackets => {
                for item in items {
                    flatten(&format!("{key}[]"), item, format, pairs);
                }
            }
            ArrayFormat::Repeat => {
                for item in items {
                    flatten(key, item, format, pairs);
                }
            }
        },
        other => {
            if let Some(text) = scalar(other) {
                pairs.push((key.to_string(), text));
            }
        }
    }
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pairs(params: &Value, format: ArrayFormat) -> Vec<(String, String)> {
        to_pairs(params, format)
    }

    fn pair(key: &str, value: &str) -> (String, String) {
        (key.to_string(), value.to_string())
    }

    #[test]
    fn array_formats() {
        let params = json!({"ids": [1, 2]});
        assert_eq!(
            pairs(&params, ArrayFormat::Indices),
            vec![pair("ids[0]", "1"), pair("ids[1]", "2")]
        );
        assert_eq!(
            pairs(&params, ArrayFormat::Brackets),
            vec![pair("ids[]", "1"), pair("ids[]", "2")]
        );
        assert_eq!(
            pairs(&params, ArrayFormat::Repeat),
            vec![pair("ids", "1"), pair("ids", "2")]
        );
        assert_eq!(pairs(&params, ArrayFormat::Comma), vec![pair("ids", "1,2")]);
    }

    #[test]
    fn nested_objects_and_nulls() {
        let params = json!({"filter": {"status": 1, "name": null}, "page": 2, "all": true});
        assert_eq!(
            pairs(&params, ArrayFormat::Indices),
            vec![pair("all", "true"), pair("filter[status]", "1"), pair("page", "2")]
        );
    }

    #[test]
    fn append_encodes_brackets() -> Result<(), url::ParseError> {
        let mut url = Url::parse("http://localhost/admin/user/list")?;
        append(&mut url, &json!({"roleIds": [3], "username": "a b"}), ArrayFormat::Indices);
        assert_eq!(url.query(), Some("roleIds%5B0%5D=3&username=a+b"));

        let mut url = Url::parse("http://localhost/health")?;
        append(&mut url, &json!({}), ArrayFormat::Indices);
        assert_eq!(url.query(), None);
        Ok(())
    }
}
