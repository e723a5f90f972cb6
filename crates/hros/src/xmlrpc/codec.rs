// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! XML-RPC document encoding and decoding.

use super::{Value, XmlRpcError};
use base64::Engine;
use roxmltree::{Document, Node};
use std::collections::BTreeMap;
use std::fmt::Write;

const XML_DECL: &str = "<?xml version=\"1.0\"?>";

/// Encode a `<methodCall>` document.
pub fn encode_call(method: &str, params: &[Value]) -> String {
    let mut out = String::with_capacity(256);
    out.push_str(XML_DECL);
    out.push_str("<methodCall><methodName>");
    escape_into(&mut out, method);
    out.push_str("</methodName><params>");
    for param in params {
        out.push_str("<param>");
        write_value(&mut out, param);
        out.push_str("</param>");
    }
    out.push_str("</params></methodCall>");
    out
}

/// Encode a successful `<methodResponse>` carrying one value.
pub fn encode_response(value: &Value) -> String {
    let mut out = String::with_capacity(256);
    out.push_str(XML_DECL);
    out.push_str("<methodResponse><params><param>");
    write_value(&mut out, value);
    out.push_str("</param></params></methodResponse>");
    out
}

/// Encode a `<fault>` response.
pub fn encode_fault(code: i32, message: &str) -> String {
    let mut members = BTreeMap::new();
    members.insert("faultCode".to_string(), Value::Int(code));
    members.insert("faultString".to_string(), Value::from(message));

    let mut out = String::with_capacity(256);
    out.push_str(XML_DECL);
    out.push_str("<methodResponse><fault>");
    write_value(&mut out, &Value::Struct(members));
    out.push_str("</fault></methodResponse>");
    out
}

/// Decode a `<methodCall>` into its method name and parameters.
pub fn parse_call(xml: &str) -> Result<(String, Vec<Value>), XmlRpcError> {
    let doc = Document::parse(xml).map_err(|e| XmlRpcError::Parse(e.to_string()))?;
    let root = doc.root_element();
    if root.tag_name().name() != "methodCall" {
        return Err(XmlRpcError::Malformed(format!(
            "expected <methodCall>, found <{}>",
            root.tag_name().name()
        )));
    }

    let method = child(root, "methodName")
        .map(text_of)
        .ok_or_else(|| XmlRpcError::Malformed("missing <methodName>".into()))?;

    let params = match child(root, "params") {
        Some(params) => parse_params(params)?,
        None => Vec::new(),
    };

    Ok((method.trim().to_string(), params))
}

/// Decode a `<methodResponse>`; a `<fault>` becomes [`XmlRpcError::Fault`].
pub fn parse_response(xml: &str) -> Result<Value, XmlRpcError> {
    let doc = Document::parse(xml).map_err(|e| XmlRpcError::Parse(e.to_string()))?;
    let root = doc.root_element();
    if root.tag_name().name() != "methodResponse" {
        return Err(XmlRpcError::Malformed(format!(
            "expected <methodResponse>, found <{}>",
            root.tag_name().name()
        )));
    }

    if let Some(fault) = child(root, "fault") {
        let value = child(fault, "value")
            .ok_or_else(|| XmlRpcError::Malformed("empty <fault>".into()))
            .and_then(parse_value)?;
        let members = value.as_struct();
        let code = members
            .and_then(|m| m.get("faultCode"))
            .and_then(Value::as_i32)
            .unwrap_or(-1);
        let message = members
            .and_then(|m| m.get("faultString"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        return Err(XmlRpcError::Fault { code, message });
    }

    let params = child(root, "params")
        .ok_or_else(|| XmlRpcError::Malformed("response without <params>".into()))?;
    parse_params(params)?
        .into_iter()
        .next()
        .ok_or_else(|| XmlRpcError::Malformed("response without a value".into()))
}

fn parse_params(params: Node) -> Result<Vec<Value>, XmlRpcError> {
    elements(params)
        .filter(|n| n.tag_name().name() == "param")
        .map(|param| {
            child(param, "value")
                .ok_or_else(|| XmlRpcError::Malformed("<param> without <value>".into()))
                .and_then(parse_value)
        })
        .collect()
}

fn parse_value(node: Node) -> Result<Value, XmlRpcError> {
    // Untyped content defaults to string.
    let Some(typed) = elements(node).next() else {
        return Ok(Value::String(text_of(node)));
    };

    let text = || text_of(typed);
    match typed.tag_name().name() {
        "i4" | "int" => text()
            .trim()
            .parse()
            .map(Value::Int)
            .map_err(|e| XmlRpcError::Malformed(format!("bad int: {}", e))),
        "boolean" => match text().trim() {
            "1" | "true" => Ok(Value::Bool(true)),
            "0" | "false" => Ok(Value::Bool(false)),
            other => Err(XmlRpcError::Malformed(format!("bad boolean: {}", other))),
        },
        "string" => Ok(Value::String(text())),
        "double" => text()
            .trim()
            .parse()
            .map(Value::Double)
            .map_err(|e| XmlRpcError::Malformed(format!("bad double: {}", e))),
        "base64" => {
            let compact: String = text().split_whitespace().collect();
            base64::engine::general_purpose::STANDARD
                .decode(compact)
                .map(Value::Base64)
                .map_err(|e| XmlRpcError::Malformed(format!("bad base64: {}", e)))
        }
        "array" => {
            let Some(data) = child(typed, "data") else {
                return Ok(Value::Array(Vec::new()));
            };
            elements(data)
                .filter(|n| n.tag_name().name() == "value")
                .map(parse_value)
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array)
        }
        "struct" => {
            let mut members = BTreeMap::new();
            for member in elements(typed).filter(|n| n.tag_name().name() == "member") {
                let name = child(member, "name")
                    .map(text_of)
                    .ok_or_else(|| XmlRpcError::Malformed("<member> without <name>".into()))?;
                let value = child(member, "value")
                    .ok_or_else(|| XmlRpcError::Malformed("<member> without <value>".into()))
                    .and_then(parse_value)?;
                members.insert(name, value);
            }
            Ok(Value::Struct(members))
        }
        "nil" => Ok(Value::String(String::new())),
        other => Err(XmlRpcError::Malformed(format!(
            "unsupported value type <{}>",
            other
        ))),
    }
}

fn write_value(out: &mut String, value: &Value) {
    out.push_str("<value>");
    match value {
        Value::Int(i) => {
            let _ = write!(out, "<i4>{}</i4>", i);
        }
        Value::Bool(b) => {
            let _ = write!(out, "<boolean>{}</boolean>", u8::from(*b));
        }
        Value::String(s) => {
            out.push_str("<string>");
            escape_into(out, s);
            out.push_str("</string>");
        }
        Value::Double(d) => {
            let _ = write!(out, "<double>{}</double>", d);
        }
        Value::Base64(bytes) => {
            out.push_str("<base64>");
            out.push_str(&base64::engine::general_purpose::STANDARD.encode(bytes));
            out.push_str("</base64>");
        }
        Value::Array(items) => {
            out.push_str("<array><data>");
            for item in items {
                write_value(out, item);
            }
            out.push_str("</data></array>");
        }
        Value::Struct(members) => {
            out.push_str("<struct>");
            for (name, member) in members {
                out.push_str("<member><name>");
                escape_into(out, name);
                out.push_str("</name>");
                write_value(out, member);
                out.push_str("</member>");
            }
            out.push_str("</struct>");
        }
    }
    out.push_str("</value>");
}

fn escape_into(out: &mut String, s: &str) {
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
}

fn elements<'a, 'input>(node: Node<'a, 'input>) -> impl Iterator<Item = Node<'a, 'input>> {
    node.children().filter(Node::is_element)
}

fn child<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    elements(node).find(|n| n.tag_name().name() == name)
}

fn text_of(node: Node) -> String {
    node.descendants()
        .filter(Node::is_text)
        .filter_map(|n| n.text())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_roundtrip_preserves_nested_values() {
        let params = vec![
            Value::from("/talker"),
            Value::from("/chatter"),
            Value::Array(vec![Value::Array(vec![Value::from("TCPROS")])]),
        ];
        let xml = encode_call("requestTopic", &params);
        let (method, parsed) = parse_call(&xml).unwrap();
        assert_eq!(method, "requestTopic");
        assert_eq!(parsed, params);
    }

    #[test]
    fn test_parse_response_from_master() {
        // Shape produced by rosmaster (untyped string, nested array).
        let xml = r#"<?xml version='1.0'?>
<methodResponse>
<params>
<param>
<value><array><data>
<value><int>1</int></value>
<value><string>Registered [/listener] as subscriber of [/chatter]</string></value>
<value><array><data>
<value>http://robot:40111/</value>
</data></array></value>
</data></array></value>
</param>
</params>
</methodResponse>"#;
        let value = parse_response(xml).unwrap();
        let items = value.as_array().unwrap();
        assert_eq!(items[0], Value::Int(1));
        assert_eq!(
            items[2].to_string_list(),
            Some(vec!["http://robot:40111/".to_string()])
        );
    }

    #[test]
    fn test_fault_roundtrip() {
        let xml = encode_fault(-32601, "no such method <x>");
        match parse_response(&xml) {
            Err(XmlRpcError::Fault { code, message }) => {
                assert_eq!(code, -32601);
                assert_eq!(message, "no such method <x>");
            }
            other => panic!("expected fault, got {:?}", other),
        }
    }

    #[test]
    fn test_escaping_and_struct() {
        let mut members = BTreeMap::new();
        members.insert("a&b".to_string(), Value::from("x < y"));
        members.insert("flag".to_string(), Value::Bool(true));
        members.insert("blob".to_string(), Value::Base64(vec![0, 1, 2, 255]));
        members.insert("ratio".to_string(), Value::Double(0.25));
        let value = Value::Struct(members);

        let xml = encode_response(&value);
        assert!(xml.contains("a&amp;b"));
        assert!(xml.contains("x &lt; y"));
        assert_eq!(parse_response(&xml).unwrap(), value);
    }

    #[test]
    fn test_rejects_wrong_root() {
        assert!(matches!(
            parse_call("<methodResponse/>"),
            Err(XmlRpcError::Malformed(_))
        ));
        assert!(matches!(parse_call("<methodCall>"), Err(XmlRpcError::Parse(_))));
    }

    #[test]
    fn test_empty_params_and_bad_int() {
        let (method, params) =
            parse_call("<methodCall><methodName>getPid</methodName></methodCall>").unwrap();
        assert_eq!(method, "getPid");
        assert!(params.is_empty());

        let bad = "<methodResponse><params><param><value><i4>x</i4></value></param></params></methodResponse>";
        assert!(matches!(parse_response(bad), Err(XmlRpcError::Malformed(_))));
    }
}
