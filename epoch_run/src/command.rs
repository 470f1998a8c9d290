use std::io::{self, BufRead};
use std::path::Path;
use std::thread;
use tracing::{info, warn};
use record::Attrs;
use rig_control::{RecordingTransport, StimClient};
use stim_lib::ProtocolLibrary;
use crate::args::*;
use crate::config::{load_config, ConfigError};
use crate::controller::RunControl;
use crate::error::RunError;
use crate::session::{parse_attr_value, parse_param_value, split_assignment, Session};

fn session(config:Option<&Path>) -> Result<Session,RunError> {
    Session::new(load_config(config)?)
}

fn assignment(s:&str) -> Result<(&str,&str),RunError> {
    split_assignment(s).ok_or_else(|| ConfigError::Invalid(format!("expected key=value, got {}",s)).into())
}

/// select the protocol, then the preset, then the individual settings
fn apply_protocol_args(session:&mut Session,args:&ProtocolArgs) -> Result<(),RunError> {
    session.select_protocol(&args.protocol)?;
    if let Some(preset) = &args.preset {
        session.select_preset(preset)?;
    }
    for setting in &args.parameters {
        let (key,value) = assignment(setting)?;
        session.set_parameter(key,parse_param_value(value))?;
    }
    Ok(())
}

/// forward stop, pause and resume typed on stdin to the running controller
fn listen_for_control(control:RunControl) {
    thread::spawn(move ||{
        for line in io::stdin().lock().lines().map_while(Result::ok) {
            match line.trim() {
                "stop" => control.stop(),
                "pause" => control.pause(),
                "resume" => control.resume(),
                "status" => println!("{}",control.status_line()),
                "" => {},
                other => warn!("unknown control command {}, expected stop, pause, resume or status",other),
            }
        }
    });
}

fn dry_run(session:&mut Session,dry:bool) -> Option<RecordingTransport> {
    if !dry {
        return None
    }
    let transport = RecordingTransport::new();
    session.use_renderer(StimClient::new(Box::new(transport.clone())));
    Some(transport)
}

fn report_dry_run(transport:Option<RecordingTransport>) {
    if let Some(transport) = transport {
        for (_,command) in transport.commands() {
            println!("{}",serde_json::to_string(&command).unwrap_or_default());
        }
    }
}

pub fn init(config:Option<&Path>,args:&InitArgs) -> Result<(),RunError> {
    let mut session = session(config)?;
    let record = session.initialize_experiment(&args.experiment)?;
    println!("{}",record.file().display());
    Ok(())
}

pub fn create_animal(config:Option<&Path>,args:&CreateAnimalArgs) -> Result<(),RunError> {
    let mut session = session(config)?;
    session.load_experiment(&args.experiment)?;
    let mut metadata = Attrs::new();
    for entry in &args.metadata {
        let (key,value) = assignment(entry)?;
        metadata.insert(key.to_string(),parse_attr_value(value));
    }
    let id = session.create_animal(&metadata)?;
    println!("{}",id);
    Ok(())
}

pub fn view(config:Option<&Path>,args:&ViewArgs) -> Result<(),RunError> {
    let mut session = session(config)?;
    apply_protocol_args(&mut session,&args.protocol)?;
    let transport = dry_run(&mut session,args.dry_run);
    listen_for_control(session.control());
    let summary = session.view()?;
    info!(epochs = summary.epochs_completed,stopped = summary.stopped,"view complete");
    report_dry_run(transport);
    Ok(())
}

pub fn record(config:Option<&Path>,args:&RecordArgs) -> Result<(),RunError> {
    let mut session = session(config)?;
    session.load_experiment(&args.experiment)?;
    session.select_animal(&args.animal)?;
    if let Some(series) = args.series {
        session.update_series_count(series)?;
    }
    apply_protocol_args(&mut session,&args.protocol)?;
    let transport = dry_run(&mut session,args.dry_run);
    listen_for_control(session.control());
    let result = session.record_run();
    if let Err(e) = &result {
        println!("{}",session.status_line());
        if let Some(record) = session.record() {
            warn!(next_series = record.series_count(),"series not recorded: {}",e);
        }
    }
    let summary = result?;
    info!(series = ?summary.series,epochs = summary.epochs_completed,stopped = summary.stopped,"recording complete");
    report_dry_run(transport);
    Ok(())
}

pub fn save_preset(config:Option<&Path>,args:&SavePresetArgs) -> Result<(),RunError> {
    let mut session = session(config)?;
    apply_protocol_args(&mut session,&args.protocol)?;
    session.save_preset(&args.name)?;
    Ok(())
}

pub fn list_protocols(config:Option<&Path>) -> Result<(),RunError> {
    // without a configuration only the built-in protocols are known
    let ids = match load_config(config) {
        Ok(config) => config.protocol_library()?.ids(),
        Err(ConfigError::FileNotFound(_)) => ProtocolLibrary::builtin().ids(),
        Err(e) => return Err(e.into()),
    };
    println!("{}",ids.join("\n"));
    Ok(())
}

pub fn list_presets(config:Option<&Path>,args:&ListPresetsArgs) -> Result<(),RunError> {
    let mut session = session(config)?;
    let names = match &args.protocol {
        Some(id) => session.select_protocol(id)?.preset_names(),
        None => stim_lib::presets::list_protocols(&session.config().parameter_presets_dir),
    };
    println!("{}",names.join("\n"));
    Ok(())
}

pub fn note(config:Option<&Path>,args:&NoteArgs) -> Result<(),RunError> {
    let mut session = session(config)?;
    session.load_experiment(&args.experiment)?;
    session.add_note(&args.text)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_config(dir:&Path) -> std::path::PathBuf {
        let file = dir.join("epoch_run.toml");
        fs::write(&file,"current_rig_name = \"rig_1\"\nexperimenter = \"tester\"\n[rig_config.rig_1]\nscreen_center = [0.0, 0.0]\n").unwrap();
        file
    }

    fn protocol_args(settings:&[&str]) -> ProtocolArgs {
        ProtocolArgs {
            protocol:String::from("MovingPatch"),
            preset:None,
            parameters:settings.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn experiment_lifecycle_from_the_command_line(){
        let dir = tempfile::tempdir().unwrap();
        let config = write_config(dir.path());
        let config = Some(config.as_path());
        init(config,&InitArgs { experiment:"exp.json".into() }).unwrap();
        create_animal(config,&CreateAnimalArgs { experiment:"exp.json".into(), metadata:vec!["animal_id=A1".into(),"age=3".into()] }).unwrap();
        record(config,&RecordArgs {
            experiment:"exp.json".into(),
            animal:"A1".into(),
            protocol:protocol_args(&["num_epochs=2","pre_time=0.0","stim_time=0.001","tail_time=0.0"]),
            series:None,
            dry_run:true,
        }).unwrap();
        note(config,&NoteArgs { experiment:"exp.json".into(), text:"done".into() }).unwrap();

        let record = record::ExperimentRecord::open(&dir.path().join("data/exp.json")).unwrap();
        assert_eq!(record.series_count(),2);
        assert_eq!(record.epoch_count(1).unwrap(),2);
        assert_eq!(record.notes().unwrap().len(),1);
    }

    #[test]
    fn malformed_settings_are_refused(){
        let dir = tempfile::tempdir().unwrap();
        let config = write_config(dir.path());
        let err = save_preset(Some(&config),&SavePresetArgs { protocol:protocol_args(&["speed"]), name:"fast".into() }).unwrap_err();
        assert_eq!(err.kind(),crate::error::ErrorKind::ConfigError);
        save_preset(Some(&config),&SavePresetArgs { protocol:protocol_args(&["speed=120"]), name:"fast".into() }).unwrap();
        assert!(dir.path().join("presets/MovingPatch.json").is_file());
    }
}
