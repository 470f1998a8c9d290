/*
    Front-end command layer. A Session owns the configuration, the open experiment record, the selected
    protocol and the controller, and turns user commands into calls on them.
 */
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use record::{Attrs, AttrValue, ExperimentRecord, RecordError};
use rig_control::StimClient;
use stim_lib::{ParamValue, Protocol, ProtocolError, ProtocolLibrary};
use crate::config::RigConfig;
use crate::controller::{Controller, DEFAULT_POLL_INTERVAL, RunControl, RunOptions, RunSummary};
use crate::error::RunError;

/// parse the right hand side of key=value. Anything that is not json is taken as text.
pub fn parse_param_value(s:&str) -> ParamValue {
    serde_json::from_str(s).unwrap_or_else(|_| ParamValue::Text(s.to_string()))
}

pub fn parse_attr_value(s:&str) -> AttrValue {
    match serde_json::from_str(s) {
        Ok(json) => AttrValue::encode(&json),
        Err(_) => AttrValue::Text(s.to_string()),
    }
}

/// split key=value
pub fn split_assignment(s:&str) -> Option<(&str,&str)> {
    let (key,value) = s.split_once('=')?;
    let key = key.trim();
    match key.is_empty() {
        true => None,
        false => Some((key,value.trim())),
    }
}

impl RunOptions {
    pub fn from_config(config:&RigConfig) -> Self {
        Self {
            trigger_on_epoch_run:config.trigger_on_epoch_run,
            trigger_on_epoch:config.trigger_on_epoch,
            trigger_channel:config.trigger.channel(),
            poll_interval:DEFAULT_POLL_INTERVAL,
        }
    }
}

pub struct Session {
    config:RigConfig,
    library:ProtocolLibrary,
    control:RunControl,
    controller:Option<Controller>,
    record:Option<ExperimentRecord>,
    protocol:Option<Protocol>,
}

impl Session {

    pub fn new(config:RigConfig) -> Result<Self,RunError> {
        let library = config.protocol_library()?;
        Ok(Self {
            config,
            library,
            control:RunControl::default(),
            controller:None,
            record:None,
            protocol:None,
        })
    }

    pub fn config(&self) -> &RigConfig {
        &self.config
    }

    pub fn control(&self) -> RunControl {
        self.control.clone()
    }

    /// Build the controller around the given renderer client. Without this the renderer named in the
    /// configuration is reached on the first run.
    pub fn use_renderer(&mut self,client:StimClient) {
        self.controller = Some(self.build_controller(client));
    }

    fn build_controller(&self,client:StimClient) -> Controller {
        let mut controller = Controller::new(client,self.config.trigger.build())
            .with_options(RunOptions::from_config(&self.config))
            .with_control(self.control.clone());
        if let Some(loco) = &self.config.locomotion {
            controller = controller.with_locomotion(loco.build());
        }
        controller
    }

    fn controller(&mut self) -> Result<&mut Controller,RunError> {
        if self.controller.is_none() {
            let client = self.config.connect_renderer()?;
            self.controller = Some(self.build_controller(client));
        }
        self.controller.as_mut().ok_or_else(|| RunError::RecordState(String::from("controller unavailable")))
    }

    pub fn record(&self) -> Option<&ExperimentRecord> {
        self.record.as_ref()
    }

    fn record_mut(&mut self) -> Result<&mut ExperimentRecord,RunError> {
        self.record.as_mut().ok_or_else(|| RunError::RecordState(String::from("no experiment record is open")))
    }

    /// relative paths are taken from the data directory
    pub fn experiment_path(&self,path:&Path) -> PathBuf {
        utils::resolve_path(&self.config.data_directory,path)
    }

    pub fn initialize_experiment(&mut self,path:&Path) -> Result<&ExperimentRecord,RunError> {
        let path = self.experiment_path(path);
        let metadata = self.config.experiment_metadata()?;
        if !self.config.data_directory.exists() {
            fs::create_dir_all(&self.config.data_directory).map_err(RecordError::from)?;
        }
        let record = ExperimentRecord::initialize(&path,&metadata)?;
        let record:&ExperimentRecord = self.record.insert(record);
        Ok(record)
    }

    /// open an existing record. The next series is one past the largest on file.
    pub fn load_experiment(&mut self,path:&Path) -> Result<&ExperimentRecord,RunError> {
        let path = self.experiment_path(path);
        let record = ExperimentRecord::open(&path)?;
        let record:&ExperimentRecord = self.record.insert(record);
        Ok(record)
    }

    pub fn create_animal(&mut self,metadata:&Attrs) -> Result<String,RunError> {
        self.config.animal_metadata.validate(metadata)?;
        Ok(self.record_mut()?.create_subject(metadata)?)
    }

    pub fn select_animal(&mut self,subject_id:&str) -> Result<(),RunError> {
        Ok(self.record_mut()?.select_subject(subject_id)?)
    }

    pub fn update_series_count(&mut self,series:u32) -> Result<(),RunError> {
        self.record_mut()?.update_series_count(series);
        Ok(())
    }

    pub fn add_note(&self,text:&str) -> Result<(),RunError> {
        let record = self.record.as_ref()
            .ok_or_else(|| RunError::RecordState(String::from("no experiment record is open")))?;
        Ok(record.create_note(text)?)
    }

    /// instantiate a protocol with its presets read from the configured preset directory
    pub fn select_protocol(&mut self,id:&str) -> Result<&mut Protocol,RunError> {
        let kind = self.library.instantiate(id)?;
        let protocol = Protocol::with_preset_dir(kind,self.config.screen_center,&self.config.parameter_presets_dir)?;
        info!(protocol = %id,"selected protocol");
        Ok(self.protocol.insert(protocol))
    }

    pub fn protocol(&self) -> Option<&Protocol> {
        self.protocol.as_ref()
    }

    fn protocol_mut(&mut self) -> Result<&mut Protocol,RunError> {
        self.protocol.as_mut().ok_or_else(|| ProtocolError::InvalidProtocolParameters(String::from("no protocol selected")).into())
    }

    /// run parameters are recognised by name, everything else is a protocol parameter
    pub fn set_parameter(&mut self,key:&str,value:ParamValue) -> Result<(),RunError> {
        let protocol = self.protocol_mut()?;
        match protocol.get_run_parameter_defaults().contains_key(key) {
            true => protocol.set_run_parameter(key,value)?,
            false => protocol.set_protocol_parameter(key,value)?,
        }
        Ok(())
    }

    pub fn save_preset(&mut self,name:&str) -> Result<(),RunError> {
        Ok(self.protocol_mut()?.update_parameter_presets(name)?)
    }

    /// an unknown name leaves the parameters as they are
    pub fn select_preset(&mut self,name:&str) -> Result<(),RunError> {
        let result = self.protocol_mut()?.select_parameter_preset(name);
        if let Err(ProtocolError::PresetNotFound(_)) = &result {
            warn!(preset = %name,"preset not found, keeping current parameters");
        }
        Ok(result?)
    }

    /// run without saving
    pub fn view(&mut self) -> Result<RunSummary,RunError> {
        let mut protocol = self.protocol.take()
            .ok_or_else(|| RunError::from(ProtocolError::InvalidProtocolParameters(String::from("no protocol selected"))))?;
        let result = self.controller().and_then(|c| c.run(&mut protocol,None));
        self.protocol = Some(protocol);
        result
    }

    /// Run and save as a new series. Refused without an open record and a selected animal.
    pub fn record_run(&mut self) -> Result<RunSummary,RunError> {
        let record = self.record.as_ref()
            .ok_or_else(|| RunError::RecordState(String::from("initialize or load an experiment first")))?;
        if record.current_subject().is_none() {
            return Err(RecordError::NoSubject.into())
        }
        let mut protocol = self.protocol.take()
            .ok_or_else(|| RunError::from(ProtocolError::InvalidProtocolParameters(String::from("no protocol selected"))))?;
        let result = self.record_with(&mut protocol);
        self.protocol = Some(protocol);
        result
    }

    fn record_with(&mut self,protocol:&mut Protocol) -> Result<RunSummary,RunError> {
        let mut record = self.record.take()
            .ok_or_else(|| RunError::RecordState(String::from("no experiment record is open")))?;
        let series = record.series_count();
        let result = match record.get_existing_series() {
            Ok(before) => {
                let result = self.controller().and_then(|c| c.run(protocol,Some(&mut record)));
                // a series that made it to disk uses up its number, even if the run failed afterwards
                match record.get_existing_series() {
                    Ok(after) if !before.contains(&series) && after.contains(&series) => record.advance_series_count(),
                    Ok(_) => {},
                    Err(e) => warn!("could not re-read the record: {}",e),
                }
                result
            }
            Err(e) => Err(e.into()),
        };
        self.record = Some(record);
        result
    }

    pub fn stop(&self) {
        self.control.stop();
    }

    pub fn pause(&self) {
        self.control.pause();
    }

    pub fn resume(&self) {
        self.control.resume();
    }

    pub fn status_line(&self) -> String {
        self.control.status_line()
    }
}
