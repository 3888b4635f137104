//! Instance bootstrap user data.
//!
//! Scripts are split into lines and wrapped in `Fn::Base64(Fn::Join("\n", ..))`
//! so that individual lines may hold intrinsic values. Lines starting with
//! `#~` are template-only comments and never reach the instance.

use std::fs;
use std::path::Path;

use serde_json::Value;

use crate::error::TemplateResult;
use crate::intrinsic;

pub const DEFAULT_PREPEND: &str = "#!/bin/bash";
const HIDDEN_COMMENT: &str = "#~";

/// Line-oriented user data builder.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserData {
    lines: Vec<Value>,
}

impl UserData {
    /// Start with `prepend` as the first line; an empty string adds nothing.
    pub fn new(prepend: &str) -> Self {
        let mut data = Self::default();
        if !prepend.is_empty() {
            data.lines.push(Value::String(prepend.to_string()));
        }
        data
    }

    /// `name=<value>`, where `value` may be an intrinsic.
    pub fn variable(mut self, name: &str, value: impl Into<Value>) -> Self {
        let value = value.into();
        let line = match value {
            Value::String(s) => Value::String(format!("{}={}", name, s)),
            other => intrinsic::join("", vec![Value::String(format!("{}=", name)), other]),
        };
        self.lines.push(line);
        self
    }

    /// Append a single line.
    pub fn line(mut self, line: impl Into<Value>) -> Self {
        self.lines.push(line.into());
        self
    }

    /// Append the lines of a script, dropping `#~` lines.
    pub fn script(mut self, contents: &str) -> Self {
        self.lines.extend(
            contents
                .lines()
                .filter(|l| !l.starts_with(HIDDEN_COMMENT))
                .map(|l| Value::String(l.to_string())),
        );
        self
    }

    /// Append the lines of a script file.
    pub fn script_file(self, path: &Path) -> TemplateResult<Self> {
        let contents = fs::read_to_string(path)?;
        Ok(self.script(&contents))
    }

    pub fn lines(&self) -> &[Value] {
        &self.lines
    }

    pub fn build(self) -> Value {
        intrinsic::base64(intrinsic::join("\n", self.lines))
    }
}

/// Join variable declarations, source files and cleanup commands into user data.
pub fn build_bootstrap<P: AsRef<Path>>(
    sources: &[P],
    variables: Vec<Value>,
    cleanup: Vec<Value>,
    prepend: &str,
) -> TemplateResult<Value> {
    let mut data = UserData::new(prepend);
    for variable in variables {
        data = data.line(variable);
    }
    for source in sources {
        data = data.script_file(source.as_ref())?;
    }
    for command in cleanup {
        data = data.line(command);
    }
    Ok(data.build())
}
