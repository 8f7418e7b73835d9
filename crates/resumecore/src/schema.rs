use crate::ValidationError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Boolean,
    String,
    Number,
    Object,
    Array,
}

impl FieldType {
    fn matches(self, value: &serde_json::Value) -> bool {
        match self {
            FieldType::Boolean => value.is_boolean(),
            FieldType::String => value.is_string(),
            FieldType::Number => value.is_number(),
            FieldType::Object => value.is_object(),
            FieldType::Array => value.is_array(),
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            FieldType::Boolean => "boolean",
            FieldType::String => "string",
            FieldType::Number => "number",
            FieldType::Object => "object",
            FieldType::Array => "array",
        }
    }
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: FieldType,
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Shape of a JSON object payload: a flat list of typed fields.
///
/// Used both for hook payloads (validated on resolve) and for tool inputs
/// (advertised to the model as JSON Schema).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PayloadSchema {
    pub fields: Vec<FieldSpec>,
    #[serde(default)]
    pub deny_unknown: bool,
}

impl PayloadSchema {
    pub fn object() -> Self {
        Self::default()
    }

    pub fn required(self, name: impl Into<String>, ty: FieldType) -> Self {
        self.field(name, ty, true, None)
    }

    pub fn optional(self, name: impl Into<String>, ty: FieldType) -> Self {
        self.field(name, ty, false, None)
    }

    pub fn described(
        self,
        name: impl Into<String>,
        ty: FieldType,
        description: impl Into<String>,
    ) -> Self {
        self.field(name, ty, true, Some(description.into()))
    }

    pub fn deny_unknown_fields(mut self) -> Self {
        self.deny_unknown = true;
        self
    }

    fn field(
        mut self,
        name: impl Into<String>,
        ty: FieldType,
        required: bool,
        description: Option<String>,
    ) -> Self {
        self.fields.push(FieldSpec {
            name: name.into(),
            ty,
            required,
            description,
        });
        self
    }

    /// Check `payload` against the schema. A `null` optional field counts as absent.
    pub fn validate(&self, payload: &serde_json::Value) -> Result<(), ValidationError> {
        let object = payload.as_object().ok_or(ValidationError::NotAnObject)?;

        for field in &self.fields {
            match object.get(&field.name) {
                None | Some(serde_json::Value::Null) if field.required => {
                    return Err(ValidationError::MissingField(field.name.clone()));
                }
                None | Some(serde_json::Value::Null) => {}
                Some(value) if !field.ty.matches(value) => {
                    return Err(ValidationError::InvalidType {
                        field: field.name.clone(),
                        expected: field.ty.as_str().to_string(),
                        actual: json_type_name(value).to_string(),
                    });
                }
                Some(_) => {}
            }
        }

        if self.deny_unknown {
            if let Some(extra) = object
                .keys()
                .find(|key| !self.fields.iter().any(|f| &f.name == *key))
            {
                return Err(ValidationError::UnexpectedField(extra.clone()));
            }
        }

        Ok(())
    }

    /// Render as a JSON Schema object, the format model providers expect for tool parameters.
    pub fn json_schema(&self) -> serde_json::Value {
        let mut properties = serde_json::Map::new();
        for field in &self.fields {
            let mut prop = serde_json::Map::new();
            prop.insert("type".into(), field.ty.as_str().into());
            if let Some(description) = &field.description {
                prop.insert("description".into(), description.clone().into());
            }
            properties.insert(field.name.clone(), serde_json::Value::Object(prop));
        }
        let required: Vec<serde_json::Value> = self
            .fields
            .iter()
            .filter(|f| f.required)
            .map(|f| f.name.clone().into())
            .collect();

        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": required,
            "additionalProperties": !self.deny_unknown,
        })
    }
}

/// A typed payload delivered to a hook from outside the run.
pub trait HookPayload: Serialize + DeserializeOwned + Send + 'static {
    fn schema() -> PayloadSchema;
}
