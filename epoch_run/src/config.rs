/*
    Rig configuration.

    current_rig_name = "rig_1"
    experimenter = "A. Person"
    parameter_presets_dir = "presets"

    [rig_config.rig_1]
    screen_center = [0.0, 0.0]
    data_directory = "data"
    [rig_config.rig_1.server_options]
    host = "127.0.0.1"
    port = 60629
    use_server = false
    [rig_config.rig_1.devices.trigger]
    kind = "none"

    [module_paths]
    protocol = "my_protocols.toml"

    [animal_metadata]
    species = ["mouse", "fly"]
    [animal_metadata.transgenes]
    driver = ["GAL4"]
    effector = ["GCaMP6f"]
    max_drivers = 1
    max_effectors = 2

    Relative paths are taken relative to the directory of the configuration file.
 */
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use serde::{Serialize,Deserialize};
use serde_json::Value;
use tracing::{debug, info};
use record::{AttrValue, Attrs, ExperimentMetadata};
use rig_control::renderer::{StimClient, DEFAULT_HOST, DEFAULT_LOCAL_RENDERER, DEFAULT_PORT};
use rig_control::{LocoDescriptor, RendererError, TriggerDescriptor};
use stim_lib::{ProtocolError, ProtocolLibrary};

pub const CONFIG_FILE_NAME:&str = "epoch_run.toml";
pub const CONFIG_ENV:&str = "EPOCH_RUN_CONFIG";
pub const RIG_ENV:&str = "EPOCH_RUN_RIG";
pub const DATA_DIR_ENV:&str = "EPOCH_RUN_DATA_DIR";
pub const EXPERIMENTER_ENV:&str = "EPOCH_RUN_EXPERIMENTER";
const PARENT_SEARCH_DEPTH:usize = 3;

#[derive(Debug,thiserror::Error)]
pub enum ConfigError {
    #[error("configuration file not found. Searched:\n{0}")]
    FileNotFound(String),
    #[error("cannot read {path:?}: {source}")]
    Read { path:PathBuf, source:io::Error },
    #[error("malformed configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("extension module not found: {0:?}")]
    MissingExtension(PathBuf),
    #[error("cannot load protocol extension: {0}")]
    ProtocolExtension(#[from] ProtocolError),
}

#[derive(Clone,Debug,PartialEq,Serialize,Deserialize)]
pub struct ServerOptions {
    #[serde(default = "default_host")]
    pub host:String,
    #[serde(default = "default_port")]
    pub port:u16,
    #[serde(default)]
    pub use_server:bool,
}

fn default_host() -> String {
    String::from(DEFAULT_HOST)
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host:default_host(),
            port:default_port(),
            use_server:false,
        }
    }
}

#[derive(Clone,Debug,Default,PartialEq,Serialize,Deserialize)]
pub struct Devices {
    #[serde(default)]
    pub trigger:TriggerDescriptor,
    #[serde(default)]
    pub locomotion:Option<LocoDescriptor>,
}

#[derive(Clone,Debug,PartialEq,Serialize,Deserialize)]
pub struct RigEntry {
    #[serde(default = "default_screen_center")]
    pub screen_center:Vec<f64>,
    #[serde(default)]
    pub server_options:ServerOptions,
    #[serde(default)]
    pub data_directory:Option<PathBuf>,
    #[serde(default)]
    pub devices:Devices,
    #[serde(default = "default_true")]
    pub trigger_on_epoch_run:bool,
    #[serde(default)]
    pub trigger_on_epoch:bool,
}

fn default_screen_center() -> Vec<f64> {
    vec![0.0,0.0]
}

fn default_true() -> bool {
    true
}

#[derive(Clone,Debug,Default,PartialEq,Serialize,Deserialize)]
pub struct ModulePaths {
    /// toml file of user protocols
    pub protocol:Option<PathBuf>,
    /// toml file whose [attributes] are added to every new record
    pub data:Option<PathBuf>,
    /// local renderer executable
    pub client:Option<PathBuf>,
}

#[derive(Clone,Debug,Default,PartialEq,Serialize,Deserialize)]
pub struct Transgenes {
    #[serde(default)]
    pub driver:Vec<String>,
    #[serde(default)]
    pub effector:Vec<String>,
    #[serde(default = "default_max_transgenes")]
    pub max_drivers:usize,
    #[serde(default = "default_max_transgenes")]
    pub max_effectors:usize,
}

fn default_max_transgenes() -> usize {
    2
}

/// allowed values for subject metadata fields
#[derive(Clone,Debug,Default,PartialEq,Serialize,Deserialize)]
pub struct AnimalMetadata {
    #[serde(default)]
    pub transgenes:Option<Transgenes>,
    #[serde(flatten)]
    pub choices:BTreeMap<String,Vec<String>>,
}

impl AnimalMetadata {

    /// Subject metadata must use listed choices. Drivers and effectors are lists of transgene names
    /// bounded by the configured maxima.
    pub fn validate(&self,metadata:&Attrs) -> Result<(),ConfigError> {
        for (field,choices) in &self.choices {
            if let Some(value) = metadata.get(field) {
                let value = value.to_string();
                if !choices.contains(&value) {
                    return Err(ConfigError::Invalid(format!("{} must be one of {:?}, got {}",field,choices,value)))
                }
            }
        }
        if let Some(transgenes) = &self.transgenes {
            Self::check_transgenes(metadata,"drivers",&transgenes.driver,transgenes.max_drivers)?;
            Self::check_transgenes(metadata,"effectors",&transgenes.effector,transgenes.max_effectors)?;
        }
        Ok(())
    }

    fn check_transgenes(metadata:&Attrs,field:&str,choices:&[String],max:usize) -> Result<(),ConfigError> {
        let names:Vec<String> = match metadata.get(field) {
            None => return Ok(()),
            Some(v) => match v.as_list() {
                Some(list) => list.iter().map(|n| n.as_str().map(|s| s.to_string()).unwrap_or_else(|| n.to_string())).collect(),
                None => vec![v.to_string()],
            }
        };
        if names.len() > max {
            return Err(ConfigError::Invalid(format!("at most {} {} allowed, got {}",max,field,names.len())))
        }
        if let Some(bad) = names.iter().find(|n| !choices.is_empty() && !choices.contains(n)) {
            return Err(ConfigError::Invalid(format!("{} is not a known {} choice",bad,field)))
        }
        Ok(())
    }
}

/// the configuration file as written
#[derive(Clone,Debug,PartialEq,Serialize,Deserialize)]
pub struct ConfigFile {
    pub current_rig_name:String,
    #[serde(default)]
    pub rig_config:BTreeMap<String,RigEntry>,
    #[serde(default)]
    pub experimenter:String,
    #[serde(default)]
    pub parameter_presets_dir:Option<PathBuf>,
    #[serde(default)]
    pub module_paths:ModulePaths,
    #[serde(default)]
    pub animal_metadata:AnimalMetadata,
}

#[derive(Clone,Debug,Default)]
pub struct Overrides {
    pub rig:Option<String>,
    pub data_directory:Option<PathBuf>,
    pub experimenter:Option<String>,
}

impl Overrides {
    pub fn from_env() -> Self {
        Self {
            rig:env::var(RIG_ENV).ok(),
            data_directory:env::var(DATA_DIR_ENV).ok().map(PathBuf::from),
            experimenter:env::var(EXPERIMENTER_ENV).ok(),
        }
    }
}

/// configuration of the selected rig with every path resolved
#[derive(Clone,Debug,PartialEq)]
pub struct RigConfig {
    pub rig_name:String,
    pub experimenter:String,
    pub screen_center:(f64,f64),
    pub server_options:ServerOptions,
    pub data_directory:PathBuf,
    pub trigger:TriggerDescriptor,
    pub locomotion:Option<LocoDescriptor>,
    pub trigger_on_epoch_run:bool,
    pub trigger_on_epoch:bool,
    pub parameter_presets_dir:PathBuf,
    pub protocol_extension:Option<PathBuf>,
    pub data_extension:Option<PathBuf>,
    pub client_program:PathBuf,
    pub animal_metadata:AnimalMetadata,
}

impl ConfigFile {

    pub fn resolve(mut self,base_dir:&Path,overrides:&Overrides) -> Result<RigConfig,ConfigError> {
        if let Some(rig) = &overrides.rig {
            self.current_rig_name = rig.clone();
        }
        if let Some(experimenter) = &overrides.experimenter {
            self.experimenter = experimenter.clone();
        }
        let rig = self.rig_config.remove(&self.current_rig_name)
            .ok_or_else(|| ConfigError::Invalid(format!("no rig_config entry for {}",self.current_rig_name)))?;

        let screen_center = match rig.screen_center.as_slice() {
            [x,y] => (*x,*y),
            _=> return Err(ConfigError::Invalid(String::from("screen_center must be a pair of numbers")))
        };
        if rig.server_options.use_server && rig.server_options.port == 0 {
            return Err(ConfigError::Invalid(String::from("a server port is required when use_server is set")))
        }

        let extension = |path:&Option<PathBuf>| -> Result<Option<PathBuf>,ConfigError> {
            match path {
                None => Ok(None),
                Some(p) => {
                    let p = utils::resolve_path(base_dir,p);
                    match p.exists() {
                        true => Ok(Some(p)),
                        false => Err(ConfigError::MissingExtension(p)),
                    }
                }
            }
        };
        let protocol_extension = extension(&self.module_paths.protocol)?;
        let data_extension = extension(&self.module_paths.data)?;
        let client_program = extension(&self.module_paths.client)?
            .unwrap_or_else(|| PathBuf::from(DEFAULT_LOCAL_RENDERER));

        let data_directory = overrides.data_directory.clone()
            .or(rig.data_directory)
            .map(|d| utils::resolve_path(base_dir,&d))
            .unwrap_or_else(|| base_dir.join("data"));
        let parameter_presets_dir = self.parameter_presets_dir
            .map(|d| utils::resolve_path(base_dir,&d))
            .unwrap_or_else(|| base_dir.join("presets"));

        Ok(RigConfig {
            rig_name:self.current_rig_name,
            experimenter:self.experimenter,
            screen_center,
            server_options:rig.server_options,
            data_directory,
            trigger:rig.devices.trigger,
            locomotion:rig.devices.locomotion,
            trigger_on_epoch_run:rig.trigger_on_epoch_run,
            trigger_on_epoch:rig.trigger_on_epoch,
            parameter_presets_dir,
            protocol_extension,
            data_extension,
            client_program,
            animal_metadata:self.animal_metadata,
        })
    }
}

/// EPOCH_RUN_CONFIG, then ./epoch_run.toml, then the same name in up to three parent directories
pub fn find_config_file() -> Result<PathBuf,ConfigError> {
    if let Ok(env_path) = env::var(CONFIG_ENV) {
        let path = PathBuf::from(env_path);
        return match path.is_file() {
            true => Ok(path),
            false => Err(ConfigError::FileNotFound(format!("{} (from {})",path.display(),CONFIG_ENV)))
        }
    }
    let cwd = env::current_dir().map_err(|e| ConfigError::Read { path:PathBuf::from("."), source:e })?;
    let search_paths:Vec<PathBuf> = cwd.ancestors()
        .take(PARENT_SEARCH_DEPTH + 1)
        .map(|dir| dir.join(CONFIG_FILE_NAME))
        .collect();
    search_paths.iter().find(|p| p.is_file()).cloned().ok_or_else(||{
        ConfigError::FileNotFound(search_paths.iter().map(|p| format!("  - {}",p.display())).collect::<Vec<_>>().join("\n"))
    })
}

pub fn load_config(config_path:Option<&Path>) -> Result<RigConfig,ConfigError> {
    let config_file = match config_path {
        Some(path) => path.to_path_buf(),
        None => find_config_file()?,
    };
    let content = fs::read_to_string(&config_file)
        .map_err(|e| ConfigError::Read { path:config_file.clone(), source:e })?;
    let base_dir = config_file.parent().map(|p| p.to_path_buf()).unwrap_or_else(|| PathBuf::from("."));
    let parsed:ConfigFile = toml::from_str(&content)?;
    let config = parsed.resolve(&base_dir,&Overrides::from_env())?;
    info!(file = ?config_file,rig = %config.rig_name,"loaded configuration");
    Ok(config)
}

#[derive(Debug,Default,Deserialize)]
struct DataExtension {
    #[serde(default)]
    attributes:BTreeMap<String,toml::Value>,
}

impl RigConfig {

    pub fn protocol_library(&self) -> Result<ProtocolLibrary,ConfigError> {
        match &self.protocol_extension {
            Some(path) => Ok(ProtocolLibrary::load(path)?),
            None => Ok(ProtocolLibrary::builtin()),
        }
    }

    /// attributes written to the root of every new record
    pub fn experiment_metadata(&self) -> Result<ExperimentMetadata,ConfigError> {
        let mut rig_attributes = Attrs::new();
        rig_attributes.insert("screen_center".into(),AttrValue::encode(&serde_json::json!([self.screen_center.0,self.screen_center.1])));
        let mut extra = Attrs::new();
        if let Some(path) = &self.data_extension {
            let s = fs::read_to_string(path).map_err(|e| ConfigError::Read { path:path.clone(), source:e })?;
            let ext:DataExtension = toml::from_str(&s)?;
            for (key,val) in ext.attributes {
                let json:Value = serde_json::to_value(&val)
                    .map_err(|e| ConfigError::Invalid(format!("attribute {}: {}",key,e)))?;
                extra.insert(key,AttrValue::encode(&json));
            }
            debug!(count = extra.len(),"loaded data extension attributes");
        }
        Ok(ExperimentMetadata {
            experimenter:self.experimenter.clone(),
            rig_name:self.rig_name.clone(),
            rig_attributes,
            extra,
        })
    }

    /// the remote server when use_server is set, otherwise a locally launched renderer
    pub fn connect_renderer(&self) -> Result<StimClient,RendererError> {
        match self.server_options.use_server {
            true => StimClient::connect(&self.server_options.host,self.server_options.port),
            false => StimClient::launch(&self.client_program.to_string_lossy()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG:&str = r#"
current_rig_name = "rig_1"
experimenter = "tester"

[rig_config.rig_1]
screen_center = [90.0, 5.0]
data_directory = "data"
[rig_config.rig_1.devices.trigger]
kind = "command"
program = "pulse"
channel = 1

[rig_config.rig_2]

[animal_metadata]
species = ["mouse", "fly"]
[animal_metadata.transgenes]
driver = ["GAL4", "LexA"]
max_drivers = 1
"#;

    fn parse() -> ConfigFile {
        toml::from_str(CONFIG).unwrap()
    }

    #[test]
    fn defaults_fill_missing_sections(){
        let base = Path::new("/rigs");
        let rig = parse().resolve(base,&Overrides { rig:Some("rig_2".into()), ..Default::default() }).unwrap();
        assert_eq!(rig.screen_center,(0.0,0.0));
        assert_eq!(rig.server_options,ServerOptions::default());
        assert_eq!(rig.server_options.port,60629);
        assert_eq!(rig.trigger,TriggerDescriptor::None);
        assert!(rig.trigger_on_epoch_run);
        assert_eq!(rig.data_directory,base.join("data"));
        assert_eq!(rig.client_program,PathBuf::from("stim_server"));
    }

    #[test]
    fn selected_rig_is_resolved(){
        let rig = parse().resolve(Path::new("/rigs"),&Overrides::default()).unwrap();
        assert_eq!(rig.rig_name,"rig_1");
        assert_eq!(rig.screen_center,(90.0,5.0));
        assert_eq!(rig.trigger.channel(),1);
        assert_eq!(rig.data_directory,PathBuf::from("/rigs/data"));
        assert_eq!(rig.parameter_presets_dir,PathBuf::from("/rigs/presets"));
    }

    #[test]
    fn overrides_win(){
        let o = Overrides { rig:None, data_directory:Some("/elsewhere".into()), experimenter:Some("someone".into()) };
        let rig = parse().resolve(Path::new("/rigs"),&o).unwrap();
        assert_eq!(rig.data_directory,PathBuf::from("/elsewhere"));
        assert_eq!(rig.experimenter,"someone");
    }

    #[test]
    fn invalid_configurations_are_refused(){
        let err = parse().resolve(Path::new("/rigs"),&Overrides { rig:Some("rig_9".into()), ..Default::default() }).unwrap_err();
        assert!(matches!(err,ConfigError::Invalid(_)));

        let mut c = parse();
        c.rig_config.get_mut("rig_1").unwrap().screen_center = vec![1.0];
        assert!(matches!(c.resolve(Path::new("/rigs"),&Overrides::default()),Err(ConfigError::Invalid(_))));

        let mut c = parse();
        c.module_paths.protocol = Some("not_there.toml".into());
        assert!(matches!(c.resolve(Path::new("/rigs"),&Overrides::default()),Err(ConfigError::MissingExtension(_))));

        let mut c = parse();
        let opts = &mut c.rig_config.get_mut("rig_1").unwrap().server_options;
        opts.use_server = true;
        opts.port = 0;
        assert!(matches!(c.resolve(Path::new("/rigs"),&Overrides::default()),Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn malformed_file_is_a_parse_error(){
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join(CONFIG_FILE_NAME);
        fs::write(&file,"current_rig_name = [").unwrap();
        assert!(matches!(load_config(Some(&file)),Err(ConfigError::Parse(_))));
    }

    #[test]
    fn extensions_are_loaded(){
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("protocols.toml"),"[[protocol]]\nid = \"Slow\"\nbase = \"MovingPatch\"\n[protocol.defaults]\nspeed = 10.0\n").unwrap();
        fs::write(dir.path().join("data.toml"),"[attributes]\nlab = \"vision\"\nscreens = 3\n").unwrap();
        let mut c = parse();
        c.module_paths.protocol = Some("protocols.toml".into());
        c.module_paths.data = Some("data.toml".into());
        let rig = c.resolve(dir.path(),&Overrides::default()).unwrap();
        assert!(rig.protocol_library().unwrap().ids().contains(&String::from("Slow")));
        let meta = rig.experiment_metadata().unwrap();
        assert_eq!(meta.extra["lab"],AttrValue::from("vision"));
        assert_eq!(meta.extra["screens"],AttrValue::Int(3));
    }

    #[test]
    fn animal_metadata_is_checked(){
        let rig = parse().resolve(Path::new("/rigs"),&Overrides::default()).unwrap();
        let mut subject = Attrs::new();
        subject.insert("animal_id".into(),AttrValue::from("A1"));
        subject.insert("species".into(),AttrValue::from("mouse"));
        rig.animal_metadata.validate(&subject).unwrap();

        subject.insert("species".into(),AttrValue::from("cat"));
        assert!(rig.animal_metadata.validate(&subject).is_err());

        subject.insert("species".into(),AttrValue::from("fly"));
        subject.insert("drivers".into(),AttrValue::from("[\"GAL4\",\"LexA\"]"));
        assert!(rig.animal_metadata.validate(&subject).is_err());
        subject.insert("drivers".into(),AttrValue::from("[\"GAL4\"]"));
        rig.animal_metadata.validate(&subject).unwrap();
    }
}
