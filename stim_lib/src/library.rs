/*
    Protocol lookup by identifier. Built-in families are always available; a protocol extension
    file may add families derived from a built-in with different defaults:

    [[protocol]]
    id = "FastGrating"
    base = "DriftingGrating"
    [protocol.defaults]
    rate = 60.0
    angle = [0.0, 180.0]
    [protocol.run_defaults]
    num_epochs = 20

    An entry whose id matches a built-in supersedes it.
 */
use std::collections::BTreeMap;
use std::path::Path;
use serde::{Serialize,Deserialize};
use tracing::info;
use crate::checkerboard_noise::CheckerboardNoise;
use crate::composite_suite::CompositeSuite;
use crate::drifting_grating::DriftingGrating;
use crate::expanding_spot::ExpandingSpot;
use crate::flickering_patch::FlickeringPatch;
use crate::looming_spot::LoomingSpot;
use crate::moving_patch::MovingPatch;
use crate::params::Params;
use crate::protocol::{overlay, EpochContext, EpochSpec, ProtocolError, RunTiming, StimulusProtocol};
use crate::selector::SelectorState;
use crate::uniform_flash::UniformFlash;

#[derive(Clone,Copy,Debug,PartialEq,Eq)]
pub enum ProtocolName {
    DriftingGrating,
    MovingPatch,
    LoomingSpot,
    ExpandingSpot,
    FlickeringPatch,
    UniformFlash,
    CheckerboardNoise,
    CompositeSuite,
}

impl ProtocolName {

    pub fn all() -> Vec<Self> {
        vec![
            Self::DriftingGrating,
            Self::MovingPatch,
            Self::LoomingSpot,
            Self::ExpandingSpot,
            Self::FlickeringPatch,
            Self::UniformFlash,
            Self::CheckerboardNoise,
            Self::CompositeSuite,
        ]
    }

    pub fn list() -> String {
        Self::all().iter().map(|p| p.decode()).collect::<Vec<String>>().join("\n")
    }

    pub fn encode(name:&str) -> Result<Self,ProtocolError> {
        match name {
            "DriftingGrating" => Ok(Self::DriftingGrating),
            "MovingPatch" => Ok(Self::MovingPatch),
            "LoomingSpot" => Ok(Self::LoomingSpot),
            "ExpandingSpot" => Ok(Self::ExpandingSpot),
            "FlickeringPatch" => Ok(Self::FlickeringPatch),
            "UniformFlash" => Ok(Self::UniformFlash),
            "CheckerboardNoise" => Ok(Self::CheckerboardNoise),
            "CompositeSuite" => Ok(Self::CompositeSuite),
            _=> Err(ProtocolError::UnknownProtocol(name.to_string()))
        }
    }

    pub fn decode(&self) -> String {
        match &self {
            Self::DriftingGrating => String::from("DriftingGrating"),
            Self::MovingPatch => String::from("MovingPatch"),
            Self::LoomingSpot => String::from("LoomingSpot"),
            Self::ExpandingSpot => String::from("ExpandingSpot"),
            Self::FlickeringPatch => String::from("FlickeringPatch"),
            Self::UniformFlash => String::from("UniformFlash"),
            Self::CheckerboardNoise => String::from("CheckerboardNoise"),
            Self::CompositeSuite => String::from("CompositeSuite"),
        }
    }

    pub fn instantiate(&self) -> Box<dyn StimulusProtocol> {
        match self {
            Self::DriftingGrating => Box::new(DriftingGrating),
            Self::MovingPatch => Box::new(MovingPatch),
            Self::LoomingSpot => Box::new(LoomingSpot),
            Self::ExpandingSpot => Box::new(ExpandingSpot),
            Self::FlickeringPatch => Box::new(FlickeringPatch),
            Self::UniformFlash => Box::new(UniformFlash),
            Self::CheckerboardNoise => Box::new(CheckerboardNoise),
            Self::CompositeSuite => Box::new(CompositeSuite::default()),
        }
    }
}

#[derive(Clone,Debug,Serialize,Deserialize)]
pub struct UserProtocol {
    pub id:String,
    pub base:String,
    #[serde(default)]
    pub defaults:Params,
    #[serde(default)]
    pub run_defaults:Params,
}

#[derive(Debug,Default,Serialize,Deserialize)]
struct ExtensionFile {
    #[serde(default)]
    protocol:Vec<UserProtocol>,
}

/// A built-in family running under another id with different defaults.
#[derive(Clone)]
pub struct DerivedProtocol {
    id:String,
    base:Box<dyn StimulusProtocol>,
    defaults:Params,
    run_defaults:Params,
}

impl StimulusProtocol for DerivedProtocol {
    fn protocol_id(&self) -> String {
        self.id.clone()
    }
    fn run_parameter_defaults(&self) -> Params {
        overlay(&self.base.run_parameter_defaults(),&self.run_defaults,"run default")
    }
    fn protocol_parameter_defaults(&self) -> Params {
        overlay(&self.base.protocol_parameter_defaults(),&self.defaults,"protocol default")
    }
    fn required_run_keys(&self) -> Vec<&'static str> {
        self.base.required_run_keys()
    }
    fn required_epoch_keys(&self) -> Vec<&'static str> {
        self.base.required_epoch_keys()
    }
    fn precompute(&mut self,timing:&RunTiming,params:&Params,selectors:&mut SelectorState) -> Result<(),ProtocolError> {
        self.base.precompute(timing,params,selectors)
    }
    fn build_epoch(&self,ctx:&EpochContext,selectors:&mut SelectorState) -> Result<EpochSpec,ProtocolError> {
        self.base.build_epoch(ctx,selectors)
    }
    fn supports_closed_loop(&self,params:&Params) -> bool {
        self.base.supports_closed_loop(params)
    }
}

#[derive(Clone,Debug,Default)]
pub struct ProtocolLibrary {
    user:BTreeMap<String,UserProtocol>,
}

impl ProtocolLibrary {

    pub fn builtin() -> Self {
        Self::default()
    }

    /// read a protocol extension file. Every base must name a built-in family.
    pub fn load(extension:&Path) -> Result<Self,ProtocolError> {
        let s = std::fs::read_to_string(extension)?;
        Self::from_toml(&s)
    }

    pub fn from_toml(s:&str) -> Result<Self,ProtocolError> {
        let file:ExtensionFile = toml::from_str(s)?;
        let mut user = BTreeMap::new();
        for entry in file.protocol {
            ProtocolName::encode(&entry.base)?;
            info!(protocol = %entry.id,base = %entry.base,"registered user protocol");
            user.insert(entry.id.clone(),entry);
        }
        Ok(Self { user })
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids:Vec<String> = ProtocolName::all().iter().map(|p| p.decode()).collect();
        for id in self.user.keys() {
            if !ids.contains(id) {
                ids.push(id.clone());
            }
        }
        ids
    }

    pub fn instantiate(&self,id:&str) -> Result<Box<dyn StimulusProtocol>,ProtocolError> {
        match self.user.get(id) {
            Some(entry) => Ok(Box::new(DerivedProtocol {
                id:entry.id.clone(),
                base:ProtocolName::encode(&entry.base)?.instantiate(),
                defaults:entry.defaults.clone(),
                run_defaults:entry.run_defaults.clone(),
            })),
            None => Ok(ProtocolName::encode(id)?.instantiate())
        }
    }
}
