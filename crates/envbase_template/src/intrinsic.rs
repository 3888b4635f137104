//! Intrinsic function helpers.

use serde_json::{json, Value};

pub const AWS_REGION: &str = "AWS::Region";
pub const AWS_STACK_NAME: &str = "AWS::StackName";

/// `{"Ref": name}`
pub fn reference(name: &str) -> Value {
    json!({ "Ref": name })
}

/// `{"Fn::GetAtt": [resource, attribute]}`
pub fn get_att(resource: &str, attribute: &str) -> Value {
    json!({ "Fn::GetAtt": [resource, attribute] })
}

/// Output of a nested stack resource.
pub fn stack_output(stack_resource: &str, output: &str) -> Value {
    get_att(stack_resource, &format!("Outputs.{}", output))
}

pub fn find_in_map(map: &str, top_key: impl Into<Value>, second_key: impl Into<Value>) -> Value {
    json!({ "Fn::FindInMap": [map, top_key.into(), second_key.into()] })
}

pub fn join(delimiter: &str, parts: Vec<Value>) -> Value {
    json!({ "Fn::Join": [delimiter, parts] })
}

pub fn base64(value: Value) -> Value {
    json!({ "Fn::Base64": value })
}

pub fn select(index: usize, list: Value) -> Value {
    json!({ "Fn::Select": [index.to_string(), list] })
}

/// `Fn::GetAZs` for `region`; an empty string means the stack's region.
pub fn get_azs(region: &str) -> Value {
    json!({ "Fn::GetAZs": region })
}

/// A `Tags` list from key/value pairs.
pub fn tags<I, K>(pairs: I) -> Value
where
    I: IntoIterator<Item = (K, Value)>,
    K: Into<String>,
{
    Value::Array(
        pairs
            .into_iter()
            .map(|(k, v)| json!({ "Key": k.into(), "Value": v }))
            .collect(),
    )
}
