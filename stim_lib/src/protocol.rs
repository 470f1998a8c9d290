use std::io;
use std::path::Path;
use std::time::Duration;
use dyn_clone::DynClone;
use serde_json::{Map, Value};
use tracing::{info, warn};
use record::{Attrs, AttrValue, EpochMetadata, SeriesMetadata};
use crate::params::{ParamError, ParamValue, Params, ParamsExt};
use crate::presets::{Preset, PresetStore};
use crate::selector::SelectorState;

pub const PROTOCOL_ID_KEY:&str = "protocol_ID";

/// run parameters every protocol needs unless it says otherwise
pub const BASE_RUN_KEYS:[&str;5] = ["num_epochs","pre_time","stim_time","tail_time","idle_color"];

#[derive(Debug,thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid run parameters: {0}")]
    InvalidRunParameters(String),
    #[error("invalid protocol parameters: {0}")]
    InvalidProtocolParameters(String),
    #[error("invalid parameter spec: {0}")]
    InvalidSpec(String),
    #[error("no preset named {0}")]
    PresetNotFound(String),
    #[error("unknown protocol {0}")]
    UnknownProtocol(String),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Toml(#[from] toml::de::Error),
}

impl From<ParamError> for ProtocolError {
    fn from(e:ParamError) -> Self {
        ProtocolError::InvalidProtocolParameters(e.to_string())
    }
}

/// resolved timing for one run
#[derive(Clone,Copy,Debug,PartialEq)]
pub struct RunTiming {
    pub num_epochs:usize,
    pub pre_time:f64,
    pub stim_time:f64,
    pub tail_time:f64,
    pub idle_color:f64,
    pub do_loco:bool,
}

impl RunTiming {

    pub fn from_params(run:&Params,required:&[&str]) -> Result<Self,ProtocolError> {
        let missing:Vec<&str> = required.iter().copied().filter(|key| !run.contains_key(*key)).collect();
        if !missing.is_empty() {
            return Err(ProtocolError::InvalidRunParameters(format!("missing {}",missing.join(", "))))
        }
        let bad = |e:ParamError| ProtocolError::InvalidRunParameters(e.to_string());
        let num_epochs = run.int("num_epochs").map_err(bad)?;
        if num_epochs < 1 {
            return Err(ProtocolError::InvalidRunParameters(String::from("num_epochs must be a positive integer")))
        }
        let timing = Self {
            num_epochs:num_epochs as usize,
            pre_time:run.real("pre_time").map_err(bad)?,
            stim_time:run.real("stim_time").map_err(bad)?,
            tail_time:run.real("tail_time").map_err(bad)?,
            idle_color:run.real("idle_color").map_err(bad)?,
            do_loco:run.get("do_loco").and_then(|v| v.as_bool()).unwrap_or(true),
        };
        for (key,seconds) in [("pre_time",timing.pre_time),("stim_time",timing.stim_time),("tail_time",timing.tail_time)] {
            if Duration::try_from_secs_f64(seconds).is_err() {
                return Err(ProtocolError::InvalidRunParameters(format!("{} must be a finite, non-negative number of seconds, got {}",key,seconds)))
            }
        }
        if !(0.0..=1.0).contains(&timing.idle_color) {
            return Err(ProtocolError::InvalidRunParameters(String::from("idle_color must be within [0, 1]")))
        }
        Ok(timing)
    }

    pub fn epoch_duration(&self) -> f64 {
        self.pre_time + self.stim_time + self.tail_time
    }
}

/// everything a stimulus family sees when building one epoch
pub struct EpochContext<'a> {
    pub epoch_index:usize,
    pub timing:&'a RunTiming,
    pub params:&'a Params,
    pub screen_center:(f64,f64),
}

impl EpochContext<'_> {
    pub fn center(&self,key:&str) -> Result<(f64,f64),ProtocolError> {
        let c = self.params.pair(key)?;
        Ok(crate::trajectory::adjust_center(c,self.screen_center))
    }

    pub fn randomize_order(&self) -> bool {
        self.params.get("randomize_order").and_then(|v| v.as_bool()).unwrap_or(false)
    }

    /// swept lists are crossed unless the protocol asks for them to be zipped
    pub fn all_combinations(&self) -> bool {
        self.params.get("all_combinations").and_then(|v| v.as_bool()).unwrap_or(true)
    }

    /// a parameter passed through to the renderer as is
    pub fn json(&self,key:&str) -> Result<Value,ProtocolError> {
        Ok(self.params.value(key)?.to_json())
    }
}

pub fn sampled_real(sample:&[ParamValue],index:usize,key:&str) -> Result<f64,ProtocolError> {
    sample.get(index)
        .and_then(|v| v.as_f64())
        .ok_or_else(|| ProtocolError::InvalidProtocolParameters(format!("{} must be a number or a list of numbers",key)))
}

pub fn sampled_text(sample:&[ParamValue],index:usize,key:&str) -> Result<String,ProtocolError> {
    sample.get(index)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| ProtocolError::InvalidProtocolParameters(format!("{} must be a string or a list of strings",key)))
}

/// Renderer facing parameters for one epoch plus bookkeeping stored next to them.
#[derive(Clone,Debug,Default,PartialEq)]
pub struct EpochSpec {
    pub stimuli:Vec<Map<String,Value>>,
    pub convenience:Map<String,Value>,
}

impl EpochSpec {

    pub fn single(stimulus:Value) -> Result<Self,ProtocolError> {
        Self::layered(vec![stimulus])
    }

    pub fn layered(stimuli:Vec<Value>) -> Result<Self,ProtocolError> {
        let stimuli = stimuli.into_iter().map(|s| match s {
            Value::Object(map) => Ok(map),
            other => Err(ProtocolError::InvalidProtocolParameters(format!("stimulus parameters must be a mapping, got {}",other))),
        }).collect::<Result<Vec<_>,_>>()?;
        Ok(Self {
            stimuli,
            convenience:Map::new(),
        })
    }

    pub fn with(mut self,key:&str,value:impl Into<Value>) -> Self {
        self.convenience.insert(key.to_string(),value.into());
        self
    }

    /// a mapping for a single stimulus, a list of mappings for layered ones
    pub fn epoch_parameters(&self) -> Value {
        match self.stimuli.len() {
            1 => Value::Object(self.stimuli[0].clone()),
            _=> Value::Array(self.stimuli.iter().cloned().map(Value::Object).collect())
        }
    }
}

/// The capability set of one stimulus family.
pub trait StimulusProtocol:DynClone + Send {
    fn protocol_id(&self) -> String;
    fn run_parameter_defaults(&self) -> Params {
        default_run_parameters()
    }
    fn protocol_parameter_defaults(&self) -> Params;
    fn required_run_keys(&self) -> Vec<&'static str> {
        BASE_RUN_KEYS.to_vec()
    }
    fn required_epoch_keys(&self) -> Vec<&'static str> {
        vec!["name"]
    }
    /// called once per run after the run parameters have been checked
    fn precompute(&mut self,_timing:&RunTiming,_params:&Params,_selectors:&mut SelectorState) -> Result<(),ProtocolError> {
        Ok(())
    }
    fn build_epoch(&self,ctx:&EpochContext,selectors:&mut SelectorState) -> Result<EpochSpec,ProtocolError>;
    fn supports_closed_loop(&self,_params:&Params) -> bool {
        false
    }
}

dyn_clone::clone_trait_object!(StimulusProtocol);

pub fn default_run_parameters() -> Params {
    let mut p = Params::new();
    p.insert("num_epochs".into(),ParamValue::Int(40));
    p.insert("pre_time".into(),ParamValue::Real(1.0));
    p.insert("stim_time".into(),ParamValue::Real(4.0));
    p.insert("tail_time".into(),ParamValue::Real(1.0));
    p.insert("idle_color".into(),ParamValue::Real(0.5));
    p.insert("do_loco".into(),ParamValue::Bool(true));
    p
}

/// Overlay values onto defaults. Keys absent from the defaults are dropped with a warning;
/// values that cannot take the default's shape keep the default.
pub fn overlay(defaults:&Params,values:&Params,what:&str) -> Params {
    let mut out = defaults.clone();
    for (key,val) in values {
        match defaults.get(key) {
            None => warn!(key = %key,"{} key is not a parameter of this protocol, ignoring",what),
            Some(default) => match val.conform_to(default) {
                Some(v) => {
                    out.insert(key.clone(),v);
                }
                None => warn!(key = %key,"{} value has the wrong shape, keeping default",what),
            }
        }
    }
    out
}

/// A stimulus family together with the knobs the user has set for it.
pub struct Protocol {
    kind:Box<dyn StimulusProtocol>,
    pub run_parameters:Params,
    pub protocol_parameters:Params,
    presets:PresetStore,
    screen_center:(f64,f64),
    timing:Option<RunTiming>,
    current:Option<EpochSpec>,
    num_epochs_completed:usize,
}

impl Protocol {

    pub fn new(kind:Box<dyn StimulusProtocol>,screen_center:(f64,f64),presets:PresetStore) -> Self {
        let mut p = Self {
            run_parameters:Params::new(),
            protocol_parameters:Params::new(),
            kind,
            presets,
            screen_center,
            timing:None,
            current:None,
            num_epochs_completed:0,
        };
        p.restore_defaults();
        p
    }

    /// construct and read the presets for this protocol from preset_dir
    pub fn with_preset_dir(kind:Box<dyn StimulusProtocol>,screen_center:(f64,f64),preset_dir:&Path) -> Result<Self,ProtocolError> {
        let presets = PresetStore::load(preset_dir,&kind.protocol_id())?;
        Ok(Self::new(kind,screen_center,presets))
    }

    pub fn id(&self) -> String {
        self.kind.protocol_id()
    }

    pub fn get_run_parameter_defaults(&self) -> Params {
        let mut p = self.kind.run_parameter_defaults();
        p.insert(PROTOCOL_ID_KEY.into(),ParamValue::Text(self.id()));
        p
    }

    pub fn get_protocol_parameter_defaults(&self) -> Params {
        self.kind.protocol_parameter_defaults()
    }

    fn restore_defaults(&mut self) {
        self.run_parameters = self.get_run_parameter_defaults();
        self.protocol_parameters = self.get_protocol_parameter_defaults();
    }

    /// set a run parameter, keeping the shape of its default
    pub fn set_run_parameter(&mut self,key:&str,value:ParamValue) -> Result<(),ProtocolError> {
        let value = match self.get_run_parameter_defaults().get(key) {
            Some(default) => value.conform_to(default)
                .ok_or_else(|| ProtocolError::InvalidRunParameters(format!("{} has the wrong shape",key)))?,
            None => value,
        };
        self.run_parameters.insert(key.to_string(),value);
        Ok(())
    }

    pub fn set_protocol_parameter(&mut self,key:&str,value:ParamValue) -> Result<(),ProtocolError> {
        let default = self.get_protocol_parameter_defaults().get(key).cloned()
            .ok_or_else(|| ProtocolError::InvalidProtocolParameters(format!("{} is not a parameter of {}",key,self.id())))?;
        let value = value.conform_to(&default)
            .ok_or_else(|| ProtocolError::InvalidProtocolParameters(format!("{} has the wrong shape",key)))?;
        self.protocol_parameters.insert(key.to_string(),value);
        Ok(())
    }

    pub fn screen_center(&self) -> (f64,f64) {
        self.screen_center
    }

    /// check the run parameters and let the family prepare for a new run
    pub fn prepare_run(&mut self,selectors:&mut SelectorState) -> Result<RunTiming,ProtocolError> {
        let timing = RunTiming::from_params(&self.run_parameters,&self.kind.required_run_keys())?;
        selectors.reset();
        self.kind.precompute(&timing,&self.protocol_parameters,selectors)?;
        self.timing = Some(timing);
        self.current = None;
        self.num_epochs_completed = 0;
        Ok(timing)
    }

    pub fn timing(&self) -> Option<&RunTiming> {
        self.timing.as_ref()
    }

    /// build the next epoch. The epoch index is the number of epochs completed so far.
    pub fn get_epoch_parameters(&mut self,selectors:&mut SelectorState) -> Result<&EpochSpec,ProtocolError> {
        let timing = self.timing
            .ok_or_else(|| ProtocolError::InvalidRunParameters(String::from("run has not been prepared")))?;
        let ctx = EpochContext {
            epoch_index:self.num_epochs_completed,
            timing:&timing,
            params:&self.protocol_parameters,
            screen_center:self.screen_center,
        };
        let spec = self.kind.build_epoch(&ctx,selectors)?;
        let spec:&EpochSpec = self.current.insert(spec);
        Ok(spec)
    }

    pub fn current_epoch(&self) -> Option<&EpochSpec> {
        self.current.as_ref()
    }

    pub fn check_required_epoch_keys(&self) -> Result<(),ProtocolError> {
        let spec = self.current.as_ref()
            .ok_or_else(|| ProtocolError::InvalidProtocolParameters(String::from("no epoch has been built")))?;
        if spec.stimuli.is_empty() {
            return Err(ProtocolError::InvalidProtocolParameters(String::from("epoch has no stimuli")))
        }
        for key in self.kind.required_epoch_keys() {
            if spec.stimuli.iter().any(|s| !s.contains_key(key)) {
                return Err(ProtocolError::InvalidProtocolParameters(format!("epoch parameters are missing {}",key)))
            }
        }
        Ok(())
    }

    pub fn advance_epoch_counter(&mut self) {
        self.num_epochs_completed += 1;
    }

    pub fn num_epochs_completed(&self) -> usize {
        self.num_epochs_completed
    }

    pub fn supports_closed_loop(&self) -> bool {
        self.kind.supports_closed_loop(&self.protocol_parameters)
    }

    pub fn load_parameter_presets(&mut self) -> Result<(),ProtocolError> {
        self.presets.reload()
    }

    pub fn preset_names(&self) -> Vec<String> {
        self.presets.names()
    }

    /// save the current parameters under name
    pub fn update_parameter_presets(&mut self,name:&str) -> Result<(),ProtocolError> {
        let preset = Preset {
            run_parameters:self.run_parameters.clone(),
            protocol_parameters:self.protocol_parameters.clone(),
        };
        self.presets.update(name,preset)?;
        info!(preset = %name,protocol = %self.id(),"saved parameter preset");
        Ok(())
    }

    /// restore defaults, then overlay the preset values that the defaults know about
    pub fn select_parameter_preset(&mut self,name:&str) -> Result<(),ProtocolError> {
        let preset = self.presets.get(name)
            .cloned()
            .ok_or_else(|| ProtocolError::PresetNotFound(name.to_string()))?;
        self.restore_defaults();
        self.run_parameters = overlay(&self.run_parameters,&preset.run_parameters,"preset run parameter");
        self.protocol_parameters = overlay(&self.protocol_parameters,&preset.protocol_parameters,"preset protocol parameter");
        // a preset saved under another protocol id must not rename this one
        self.run_parameters.insert(PROTOCOL_ID_KEY.into(),ParamValue::Text(self.id()));
        info!(preset = %name,protocol = %self.id(),"selected parameter preset");
        Ok(())
    }
}

impl SeriesMetadata for Protocol {
    fn run_attributes(&self) -> Attrs {
        self.run_parameters.to_attrs()
    }
    fn protocol_attributes(&self) -> Attrs {
        let mut attrs = self.protocol_parameters.to_attrs();
        attrs.insert("screen_center".into(),AttrValue::encode(&ParamValue::from(self.screen_center).to_json()));
        attrs
    }
}

impl EpochMetadata for Protocol {
    fn epoch_parameters(&self) -> Value {
        self.current.as_ref().map(|s| s.epoch_parameters()).unwrap_or(Value::Null)
    }
    fn convenience_parameters(&self) -> Map<String,Value> {
        self.current.as_ref().map(|s| s.convenience.clone()).unwrap_or_default()
    }
}
