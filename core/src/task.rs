use crate::assets::{Asset, AssetCollection};
use crate::tags::{tag, TagValue, Tags};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Default filename the rendered parameter object is staged under.
pub const DEFAULT_CONFIG_FILE_NAME: &str = "config.json";

/// An executable plus its arguments, kept split so backends can rewrite
/// either part (e.g. prepend an interpreter) without re-parsing.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct CommandLine {
    pub executable: String,
    #[serde(default)]
    pub arguments: Vec<String>,
}

impl CommandLine {
    pub fn new(executable: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
            arguments: Vec::new(),
        }
    }

    /// Split a full command on whitespace. No quoting rules; callers with
    /// quoted arguments should use [`CommandLine::add_argument`].
    pub fn from_string(command: &str) -> Self {
        let mut parts = command.split_whitespace();
        let executable = parts.next().unwrap_or_default().to_owned();
        Self {
            executable,
            arguments: parts.map(str::to_owned).collect(),
        }
    }

    pub fn add_argument(&mut self, argument: impl Into<String>) -> &mut Self {
        self.arguments.push(argument.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.executable.is_empty()
    }
}

impl std::fmt::Display for CommandLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.executable)?;
        for argument in &self.arguments {
            write!(f, " {argument}")?;
        }
        Ok(())
    }
}

/// Describes how to run one simulation: command, structured parameters, and
/// the assets it needs. Common assets are shared with sibling simulations
/// through the parent experiment; transient assets are staged per job.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct Task {
    pub command: CommandLine,
    #[serde(default)]
    pub parameters: BTreeMap<String, Value>,
    #[serde(default)]
    pub common_assets: AssetCollection,
    #[serde(default)]
    pub transient_assets: AssetCollection,
    /// Filename the parameter object is rendered to at staging time.
    #[serde(default = "default_config_file_name")]
    pub config_file_name: String,
}

fn default_config_file_name() -> String {
    DEFAULT_CONFIG_FILE_NAME.to_owned()
}

impl Task {
    pub fn new(command: CommandLine) -> Self {
        Self {
            command,
            parameters: BTreeMap::new(),
            common_assets: AssetCollection::new(),
            transient_assets: AssetCollection::new(),
            config_file_name: default_config_file_name(),
        }
    }

    pub fn from_command(command: &str) -> Self {
        Self::new(CommandLine::from_string(command))
    }

    /// Set one parameter and return the tag delta recording the change, so
    /// sweep callbacks can simply return the result.
    pub fn set_parameter(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Tags {
        let name = name.into();
        let value = value.into();
        let delta = tag(name.clone(), TagValue::from(&value));
        self.parameters.insert(name, value);
        delta
    }

    pub fn get_parameter(&self, name: &str) -> Option<&Value> {
        self.parameters.get(name)
    }

    /// Render the parameter object to the bytes staged as the config file.
    pub fn render_config(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec_pretty(&self.parameters)
    }

    /// Materialize the rendered config as a transient asset. Called by
    /// backends right before staging; idempotent.
    pub fn gather_transient_assets(&mut self) -> serde_json::Result<()> {
        if !self.parameters.is_empty() {
            let rendered = self.render_config()?;
            self.transient_assets
                .put_asset(Asset::from_bytes("", self.config_file_name.clone(), rendered));
        }
        Ok(())
    }
}
