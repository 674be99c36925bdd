// src/capabilities.rs - named helpers made available to every expression

use starlark::environment::{FrozenModule, Globals, GlobalsBuilder, Module};
use starlark::eval::Evaluator;
use starlark::starlark_module;
use starlark::syntax::AstModule;
use starlark::values::tuple::UnpackTuple;
use starlark::values::{Heap, Value};
use std::path::Path;

use crate::error::ConfigurationError;
use crate::pipeline::executor::dialect;
use crate::pipeline::global_functions::global_functions;

/// Built-in namespaces that `--require NAME` can switch on
const BUILTIN_MODULES: &[(&str, fn(&mut GlobalsBuilder))] = &[
    ("hash", hash_module),
    ("json", json_module),
    ("path", path_module),
];

/// A Starlark file whose top-level definitions are visible to every record
#[derive(Debug, Clone)]
pub struct CapabilitySource {
    pub path: String,
    module: FrozenModule,
}

/// The capability context: which namespaces and helper files expressions can see.
/// Populated once at startup, read by every record afterwards.
pub struct Capabilities {
    namespaces: Vec<&'static str>,
    sources: Vec<CapabilitySource>,
    globals: Globals,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::new()
    }
}

impl Capabilities {
    pub fn new() -> Self {
        Capabilities {
            namespaces: Vec::new(),
            sources: Vec::new(),
            globals: build_globals(&[]),
        }
    }

    /// Load a capability by built-in name or Starlark file path
    pub fn require(&mut self, module: &str) -> Result<(), ConfigurationError> {
        if let Some((name, _)) = BUILTIN_MODULES.iter().find(|(name, _)| *name == module) {
            if !self.namespaces.contains(name) {
                self.namespaces.push(*name);
                self.globals = build_globals(&self.namespaces);
            }
            tracing::debug!("required built-in module {}", name);
            return Ok(());
        }

        let source = std::fs::read_to_string(Path::new(module)).map_err(|e| {
            tracing::debug!("cannot read module {}: {}", module, e);
            ConfigurationError::UnknownModule(module.to_string())
        })?;
        let ast = AstModule::parse(module, source, &dialect()).map_err(|e| {
            tracing::debug!("cannot parse module {}: {}", module, e);
            ConfigurationError::UnknownModule(module.to_string())
        })?;

        tracing::debug!("required module file {}", module);
        let frozen = self.evaluate(module, ast)?;
        self.sources.push(CapabilitySource {
            path: module.to_string(),
            module: frozen,
        });
        Ok(())
    }

    /// Evaluate a helper file once and freeze it. It sees the namespaces and
    /// files required before it.
    fn evaluate(&self, path: &str, ast: AstModule) -> Result<FrozenModule, ConfigurationError> {
        let failed = || ConfigurationError::UnknownModule(path.to_string());

        let module = Module::new();
        self.load_into(&module);
        {
            let mut eval = Evaluator::new(&module);
            eval.eval_module(ast, &self.globals).map_err(|e| {
                tracing::debug!("cannot evaluate module {}: {}", path, e);
                failed()
            })?;
        }
        module.freeze().map_err(|e| {
            tracing::debug!("cannot freeze module {}: {}", path, e.err_msg);
            failed()
        })
    }

    pub fn globals(&self) -> &Globals {
        &self.globals
    }

    pub fn sources(&self) -> &[CapabilitySource] {
        &self.sources
    }

    /// Make the helper files' definitions visible in a fresh record module
    pub(crate) fn load_into(&self, module: &Module) {
        for capability in &self.sources {
            module.import_public_symbols(&capability.module);
        }
    }
}

fn build_globals(namespaces: &[&'static str]) -> Globals {
    let mut builder = GlobalsBuilder::standard().with(global_functions);
    for (name, register) in BUILTIN_MODULES {
        if namespaces.contains(name) {
            builder.namespace(name, *register);
        }
    }
    builder.build()
}

#[starlark_module]
fn hash_module(builder: &mut GlobalsBuilder) {
    fn sha256(text: String) -> anyhow::Result<String> {
        use sha2::{Digest, Sha256};
        Ok(hex::encode(Sha256::digest(text.as_bytes())))
    }

    fn sha512(text: String) -> anyhow::Result<String> {
        use sha2::{Digest, Sha512};
        Ok(hex::encode(Sha512::digest(text.as_bytes())))
    }
}

#[starlark_module]
fn path_module(builder: &mut GlobalsBuilder) {
    fn basename(path: String) -> anyhow::Result<String> {
        Ok(Path::new(&path)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default())
    }

    fn dirname(path: String) -> anyhow::Result<String> {
        Ok(match Path::new(&path).parent() {
            Some(parent) if parent.as_os_str().is_empty() => ".".to_string(),
            Some(parent) => parent.to_string_lossy().into_owned(),
            None => path,
        })
    }

    fn extname(path: String) -> anyhow::Result<String> {
        Ok(Path::new(&path)
            .extension()
            .map(|ext| format!(".{}", ext.to_string_lossy()))
            .unwrap_or_default())
    }

    fn join(#[starlark(args)] parts: UnpackTuple<String>) -> anyhow::Result<String> {
        let mut joined = std::path::PathBuf::new();
        for part in parts.items {
            joined.push(part);
        }
        Ok(joined.to_string_lossy().into_owned())
    }
}

#[starlark_module]
fn json_module(builder: &mut GlobalsBuilder) {
    fn decode<'v>(heap: &'v Heap, text: String) -> anyhow::Result<Value<'v>> {
        let json_value: serde_json::Value = serde_json::from_str(&text)?;
        json_to_starlark_value(heap, json_value)
    }

    fn encode(value: Value) -> anyhow::Result<String> {
        let json_value = starlark_to_json_value(value)?;
        Ok(serde_json::to_string(&json_value)?)
    }
}

fn json_to_starlark_value(heap: &Heap, json: serde_json::Value) -> anyhow::Result<Value<'_>> {
    match json {
        serde_json::Value::Null => Ok(Value::new_none()),
        serde_json::Value::Bool(b) => Ok(Value::new_bool(b)),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(heap.alloc(i))
            } else if let Some(u) = n.as_u64() {
                Ok(heap.alloc(u))
            } else if let Some(f) = n.as_f64() {
                Ok(heap.alloc(f))
            } else {
                Ok(heap.alloc(n.to_string()))
            }
        }
        serde_json::Value::String(s) => Ok(heap.alloc(s)),
        serde_json::Value::Array(arr) => {
            let values: Result<Vec<Value>, _> = arr
                .into_iter()
                .map(|v| json_to_starlark_value(heap, v))
                .collect();
            Ok(heap.alloc(values?))
        }
        serde_json::Value::Object(obj) => {
            use starlark::collections::SmallMap;
            use starlark::values::dict::Dict;

            let mut dict_map = SmallMap::new();
            for (k, v) in obj {
                let key = heap.alloc(k.as_str());
                let val = json_to_starlark_value(heap, v)?;
                let hashed = key.get_hashed().map_err(|e| anyhow::anyhow!("{}", e))?;
                dict_map.insert_hashed(hashed, val);
            }
            Ok(heap.alloc(Dict::new(dict_map)))
        }
    }
}

fn starlark_to_json_value(value: Value) -> anyhow::Result<serde_json::Value> {
    use starlark::values::{dict::DictRef, list::ListRef};

    if value.is_none() {
        Ok(serde_json::Value::Null)
    } else if let Some(b) = value.unpack_bool() {
        Ok(serde_json::Value::Bool(b))
    } else if let Some(i) = value.unpack_i32() {
        Ok(serde_json::Value::Number(serde_json::Number::from(i)))
    } else if value.get_type() == "int" {
        // Outside i32: go through the decimal form to stay exact
        let text = value.to_string();
        Ok(match (text.parse::<i64>(), text.parse::<u64>()) {
            (Ok(i), _) => serde_json::Value::Number(i.into()),
            (_, Ok(u)) => serde_json::Value::Number(u.into()),
            _ => serde_json::Value::String(text),
        })
    } else if let Some(s) = value.unpack_str() {
        Ok(serde_json::Value::String(s.to_string()))
    } else if let Some(list) = ListRef::from_value(value) {
        let arr: Result<Vec<serde_json::Value>, _> =
            list.iter().map(starlark_to_json_value).collect();
        Ok(serde_json::Value::Array(arr?))
    } else if let Some(dict) = DictRef::from_value(value) {
        let mut obj = serde_json::Map::new();
        for (k, v) in dict.iter() {
            let key = match k.unpack_str() {
                Some(s) => s.to_string(),
                None => k.to_string(),
            };
            obj.insert(key, starlark_to_json_value(v)?);
        }
        Ok(serde_json::Value::Object(obj))
    } else if value.get_type() == "float" {
        let number = value
            .to_string()
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64);
        Ok(number.map_or(serde_json::Value::Null, serde_json::Value::Number))
    } else {
        Ok(serde_json::Value::String(value.to_string()))
    }
}
