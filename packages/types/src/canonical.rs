use serde_json::Value;

/// Serializes a payload to its canonical byte form: object keys sorted
/// lexicographically, no insignificant whitespace, UTF-8. Signatures are
/// computed over exactly these bytes, so receivers must reproduce them
/// byte-for-byte.
pub fn to_canonical_json(value: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    write_value(&mut out, value);
    out
}

fn write_value(out: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Null => out.extend_from_slice(b"null"),
        Value::Bool(true) => out.extend_from_slice(b"true"),
        Value::Bool(false) => out.extend_from_slice(b"false"),
        // serde_json handles number formatting and string escaping;
        // writing into a Vec cannot fail
        Value::Number(n) => {
            serde_json::to_writer(&mut *out, n).unwrap();
        }
        Value::String(s) => {
            serde_json::to_writer(&mut *out, s).unwrap();
        }
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_value(out, item);
            }
            out.push(b']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();

            out.push(b'{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                serde_json::to_writer(&mut *out, key).unwrap();
                out.push(b':');
                write_value(out, &map[key]);
            }
            out.push(b'}');
        }
    }
}
