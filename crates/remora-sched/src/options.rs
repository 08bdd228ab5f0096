//! Declarative job options.
//!
//! Every option a job accepts is declared once in [`OPTIONS`] with its value
//! type, its default and whether it belongs to the durable record. Values are
//! held as JSON under the option's attribute key so that a job record keeps
//! the same layout on disk whatever the option's Rust-side use.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::{SchedError, SchedResult};

/// Value type accepted by an option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionType {
    Int,
    Bool,
    Str,
    /// A UUID in its hyphenated string form.
    Uuid,
    StrList,
    /// String keys to string values.
    StrMap,
    /// Arbitrary JSON object.
    Map,
}

impl OptionType {
    pub fn name(&self) -> &'static str {
        match self {
            OptionType::Int => "integer",
            OptionType::Bool => "boolean",
            OptionType::Str => "string",
            OptionType::Uuid => "uuid string",
            OptionType::StrList => "list of strings",
            OptionType::StrMap => "mapping of strings",
            OptionType::Map => "mapping",
        }
    }

    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            OptionType::Int => value.is_i64() || value.is_u64(),
            OptionType::Bool => value.is_boolean(),
            OptionType::Str => value.is_string(),
            OptionType::Uuid => value
                .as_str()
                .is_some_and(|s| uuid::Uuid::parse_str(s).is_ok()),
            OptionType::StrList => value
                .as_array()
                .is_some_and(|items| items.iter().all(Value::is_string)),
            OptionType::StrMap => value
                .as_object()
                .is_some_and(|map| map.values().all(Value::is_string)),
            OptionType::Map => value.is_object(),
        }
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "mapping",
    }
}

/// Default of an option when it was never set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionDefault {
    None,
    Bool(bool),
    EmptyStr,
    EmptyList,
    EmptyMap,
}

impl OptionDefault {
    fn value(&self) -> Option<Value> {
        match self {
            OptionDefault::None => None,
            OptionDefault::Bool(b) => Some(Value::Bool(*b)),
            OptionDefault::EmptyStr => Some(Value::String(String::new())),
            OptionDefault::EmptyList => Some(Value::Array(Vec::new())),
            OptionDefault::EmptyMap => Some(Value::Object(Map::new())),
        }
    }
}

/// Declaration of one option.
#[derive(Debug, Clone, Copy)]
pub struct OptionSpec {
    pub name: &'static str,
    /// Key under which the value is stored in the job record.
    pub attribute_key: &'static str,
    pub value_type: OptionType,
    pub default: OptionDefault,
    /// Transient options live only in memory and are never persisted.
    pub transient: bool,
    pub help: &'static str,
}

const fn option(
    name: &'static str,
    attribute_key: &'static str,
    value_type: OptionType,
    default: OptionDefault,
    help: &'static str,
) -> OptionSpec {
    OptionSpec {
        name,
        attribute_key,
        value_type,
        default,
        transient: false,
        help,
    }
}

/// The options table.
pub static OPTIONS: &[OptionSpec] = &[
    option(
        "resources",
        "jobresource_params",
        OptionType::Map,
        OptionDefault::EmptyMap,
        "Resources to request from the scheduler, interpreted by the scheduler adapter",
    ),
    option(
        "max_wallclock_seconds",
        "max_wallclock_seconds",
        OptionType::Int,
        OptionDefault::None,
        "Wallclock time limit in seconds",
    ),
    option(
        "custom_scheduler_commands",
        "custom_scheduler_commands",
        OptionType::Str,
        OptionDefault::EmptyStr,
        "Raw scheduler directives inserted verbatim after the generated ones",
    ),
    option(
        "queue_name",
        "queue_name",
        OptionType::Str,
        OptionDefault::None,
        "Name of the queue to submit to",
    ),
    option(
        "account",
        "account",
        OptionType::Str,
        OptionDefault::None,
        "Account to charge",
    ),
    option(
        "qos",
        "qos",
        OptionType::Str,
        OptionDefault::None,
        "Quality of service",
    ),
    OptionSpec {
        name: "computer",
        attribute_key: "computer",
        value_type: OptionType::Uuid,
        default: OptionDefault::None,
        transient: true,
        help: "UUID of the computer to run on; the submission step receives the resolved computer",
    },
    option(
        "withmpi",
        "withmpi",
        OptionType::Bool,
        OptionDefault::Bool(true),
        "Launch single-code jobs through the computer's MPI command",
    ),
    option(
        "mpirun_extra_params",
        "mpirun_extra_params",
        OptionType::StrList,
        OptionDefault::EmptyList,
        "Extra arguments placed after the MPI command",
    ),
    option(
        "import_sys_environment",
        "import_sys_environment",
        OptionType::Bool,
        OptionDefault::Bool(true),
        "Propagate the submitting environment to the job",
    ),
    option(
        "environment_variables",
        "custom_environment_variables",
        OptionType::StrMap,
        OptionDefault::EmptyMap,
        "Environment variables exported in the submission script",
    ),
    option(
        "priority",
        "priority",
        OptionType::Str,
        OptionDefault::None,
        "Scheduler priority",
    ),
    option(
        "max_memory_kb",
        "max_memory_kb",
        OptionType::Int,
        OptionDefault::None,
        "Memory limit in kilobytes",
    ),
    option(
        "prepend_text",
        "prepend_text",
        OptionType::Str,
        OptionDefault::EmptyStr,
        "Text inserted before the code invocations",
    ),
    option(
        "append_text",
        "append_text",
        OptionType::Str,
        OptionDefault::EmptyStr,
        "Text inserted after the code invocations",
    ),
    option(
        "parser_name",
        "parser",
        OptionType::Str,
        OptionDefault::None,
        "Name of the parser for the retrieved files",
    ),
];

/// Look up an option declaration by name.
pub fn lookup(name: &str) -> SchedResult<&'static OptionSpec> {
    OPTIONS
        .iter()
        .find(|spec| spec.name == name)
        .ok_or_else(|| SchedError::UnknownOption(name.to_string()))
}

fn lookup_attribute(key: &str) -> Option<&'static OptionSpec> {
    OPTIONS.iter().find(|spec| spec.attribute_key == key)
}

/// Option values of one job, keyed by attribute key.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct JobOptions {
    values: BTreeMap<String, Value>,
}

impl JobOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Value of `name`, falling back to its default unless `only_actually_set`.
    pub fn get(&self, name: &str, only_actually_set: bool) -> SchedResult<Option<Value>> {
        let spec = lookup(name)?;
        let value = self.values.get(spec.attribute_key).cloned();
        if value.is_some() || only_actually_set {
            return Ok(value);
        }
        Ok(spec.default.value())
    }

    /// Value of `name` (or its default) decoded into `T`.
    pub fn get_as<T: DeserializeOwned>(&self, name: &str) -> SchedResult<Option<T>> {
        let Some(value) = self.get(name, false)? else {
            return Ok(None);
        };
        let found = json_type_name(&value);
        serde_json::from_value(value)
            .map(Some)
            .map_err(|e| SchedError::InvalidOptionType {
                option: name.to_string(),
                expected: std::any::type_name::<T>().to_string(),
                found: format!("{found} ({e})"),
            })
    }

    /// Set `name` after checking the declared type.
    pub fn set(&mut self, name: &str, value: Value) -> SchedResult<()> {
        let spec = lookup(name)?;
        if !spec.value_type.accepts(&value) {
            return Err(SchedError::InvalidOptionType {
                option: name.to_string(),
                expected: spec.value_type.name().to_string(),
                found: json_type_name(&value).to_string(),
            });
        }
        self.values.insert(spec.attribute_key.to_string(), value);
        Ok(())
    }

    /// Every option with a value, by option name.
    pub fn get_all(&self, only_actually_set: bool) -> SchedResult<BTreeMap<String, Value>> {
        let mut all = BTreeMap::new();
        for spec in OPTIONS {
            if let Some(value) = self.get(spec.name, only_actually_set)? {
                all.insert(spec.name.to_string(), value);
            }
        }
        Ok(all)
    }

    /// Set several options. Stops at the first invalid one; earlier ones stay set.
    pub fn set_all<I, K>(&mut self, options: I) -> SchedResult<()>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: AsRef<str>,
    {
        for (name, value) in options {
            self.set(name.as_ref(), value)?;
        }
        Ok(())
    }

    /// Durable values keyed by attribute key, as written to the job record.
    pub fn durable_attributes(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values
            .iter()
            .filter(|(key, _)| lookup_attribute(key).is_some_and(|spec| !spec.transient))
    }
}

impl Serialize for JobOptions {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.durable_attributes())
    }
}
