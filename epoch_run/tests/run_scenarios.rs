use std::fs;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};
use epoch_run::{Controller, ErrorKind, RunState};
use record::{AttrValue, Attrs, ExperimentMetadata, ExperimentRecord};
use rig_control::trigger::NoTrigger;
use rig_control::{RecordingTransport, RenderCommand, StimClient};
use stim_lib::{ParamValue, PresetStore, Protocol, ProtocolLibrary, SelectorState};

// all scenario times are the nominal ones scaled down by 100
const SCALE:f64 = 0.01;

fn grating(angles:&[f64],num_epochs:i64,randomize:bool) -> Protocol {
    let kind = ProtocolLibrary::builtin().instantiate("DriftingGrating").unwrap();
    let mut p = Protocol::new(kind,(0.0,0.0),PresetStore::in_memory("DriftingGrating"));
    p.set_protocol_parameter("period",ParamValue::Real(20.0)).unwrap();
    p.set_protocol_parameter("rate",ParamValue::Real(20.0)).unwrap();
    p.set_protocol_parameter("contrast",ParamValue::Real(1.0)).unwrap();
    p.set_protocol_parameter("mean",ParamValue::Real(0.5)).unwrap();
    p.set_protocol_parameter("angle",ParamValue::from(angles.to_vec())).unwrap();
    p.set_protocol_parameter("randomize_order",ParamValue::Bool(randomize)).unwrap();
    p.set_run_parameter("num_epochs",ParamValue::Int(num_epochs)).unwrap();
    p.set_run_parameter("pre_time",ParamValue::Real(1.0*SCALE)).unwrap();
    p.set_run_parameter("stim_time",ParamValue::Real(4.0*SCALE)).unwrap();
    p.set_run_parameter("tail_time",ParamValue::Real(1.0*SCALE)).unwrap();
    p.set_run_parameter("idle_color",ParamValue::Real(0.5)).unwrap();
    p
}

fn controller(transport:&RecordingTransport,seed:u64) -> Controller {
    Controller::new(StimClient::new(Box::new(transport.clone())),Box::new(NoTrigger))
        .with_selectors(SelectorState::seeded(seed))
}

fn experiment(dir:&Path) -> ExperimentRecord {
    let meta = ExperimentMetadata {
        experimenter:String::from("tester"),
        rig_name:String::from("rig_1"),
        ..Default::default()
    };
    let mut record = ExperimentRecord::initialize(&dir.join("exp.json"),&meta).unwrap();
    let mut subject = Attrs::new();
    subject.insert("animal_id".into(),AttrValue::from("A1"));
    record.create_subject(&subject).unwrap();
    record
}

/// angle of every staged grating, in order
fn staged_angles(transport:&RecordingTransport) -> Vec<f64> {
    transport.commands().into_iter().filter_map(|(_,c)| match c {
        RenderCommand::LoadStim { params, hold:true } => params.get("angle").and_then(|a| a.as_f64()),
        _=> None
    }).collect()
}

#[test]
fn two_angle_grating_run(){
    let dir = tempfile::tempdir().unwrap();
    let mut record = experiment(dir.path());
    let transport = RecordingTransport::new();
    let mut c = controller(&transport,0);
    let mut p = grating(&[0.0,90.0],4,false);

    let start = Instant::now();
    let summary = c.run(&mut p,Some(&mut record)).unwrap();
    let elapsed = start.elapsed().as_secs_f64();

    assert_eq!(summary.series,Some(1));
    assert_eq!(summary.epochs_completed,4);
    assert!(!summary.stopped);
    assert!(elapsed >= 24.0*SCALE);
    assert_eq!(staged_angles(&transport),vec![0.0,90.0,0.0,90.0]);
    assert_eq!(record.epoch_names(1).unwrap(),vec!["epoch_001","epoch_002","epoch_003","epoch_004"]);
    let angles:Vec<f64> = (1..=4).map(|e| record.epoch_attrs(1,e).unwrap().unwrap()["current_angle"].as_f64().unwrap()).collect();
    assert_eq!(angles,vec![0.0,90.0,0.0,90.0]);
    assert_eq!(record.series_attrs(1).unwrap().unwrap()["period"].as_f64(),Some(20.0));
    assert_eq!(c.control().state(),RunState::Idle);
}

#[test]
fn randomized_sweep_is_reproducible(){
    let run = || {
        let transport = RecordingTransport::new();
        let mut c = controller(&transport,42);
        c.run(&mut grating(&[0.0,90.0],4,true),None).unwrap();
        staged_angles(&transport)
    };
    let first = run();
    assert_eq!(first.len(),4);
    for sweep in first.chunks(2) {
        let mut sorted = sweep.to_vec();
        sorted.sort_by(|a,b| a.partial_cmp(b).unwrap());
        assert_eq!(sorted,vec![0.0,90.0]);
    }
    assert_eq!(run(),first);
}

#[test]
fn stop_after_third_epoch(){
    let dir = tempfile::tempdir().unwrap();
    let mut record = experiment(dir.path());
    let transport = RecordingTransport::new();
    let c = controller(&transport,0);
    let control = c.control();
    let mut c = c.on_epoch(Box::new(move |completed| if completed == 3 { control.stop() }));

    let summary = c.run(&mut grating(&[0.0,90.0],10,false),Some(&mut record)).unwrap();

    assert!(summary.stopped);
    assert_eq!(summary.epochs_completed,3);
    assert_eq!(record.epoch_names(1).unwrap(),vec!["epoch_001","epoch_002","epoch_003"]);
    assert!(matches!(c.control().state(),RunState::Idle | RunState::Finished));
    assert_eq!(transport.last_idle_background(),Some(0.5));
    let last_marker = transport.commands().into_iter().rev().find_map(|(_,c)| match c {
        RenderCommand::StartCornerSquare | RenderCommand::BlackCornerSquare => Some(c),
        _=> None
    });
    assert_eq!(last_marker,Some(RenderCommand::BlackCornerSquare));
    let starts = transport.commands().iter().filter(|(_,c)| *c == RenderCommand::StartStim).count();
    assert_eq!(starts,3);
}

#[test]
fn subjects_are_unique(){
    let dir = tempfile::tempdir().unwrap();
    let mut record = experiment(dir.path());
    let mut subject = Attrs::new();
    subject.insert("animal_id".into(),AttrValue::from("A1"));
    let err = epoch_run::RunError::from(record.create_subject(&subject).unwrap_err());
    assert_eq!(err.kind(),ErrorKind::DuplicateSubject);
    assert_eq!(record.subject_ids().unwrap(),vec!["A1"]);
}

#[test]
fn series_collision_leaves_everything_untouched(){
    let dir = tempfile::tempdir().unwrap();
    let mut record = experiment(dir.path());
    record.update_series_count(5);
    controller(&RecordingTransport::new(),0).run(&mut grating(&[0.0],1,false),Some(&mut record)).unwrap();
    assert!(record.get_existing_series().unwrap().contains(&5));

    let before = fs::read_to_string(record.file()).unwrap();
    record.update_series_count(5);
    let transport = RecordingTransport::new();
    let mut c = controller(&transport,0);
    let err = c.run(&mut grating(&[0.0],1,false),Some(&mut record)).unwrap_err();

    assert_eq!(err.kind(),ErrorKind::SeriesCollision);
    assert_eq!(c.control().status_line(),"Failed: SeriesCollision");
    assert!(transport.batches().is_empty());
    assert_eq!(fs::read_to_string(record.file()).unwrap(),before);
    assert_eq!(record.series_count(),5);
}

#[test]
fn stim_phase_lasts_at_least_stim_time(){
    let transport = RecordingTransport::new();
    let mut c = controller(&transport,0);
    c.run(&mut grating(&[0.0,90.0],3,false),None).unwrap();

    let stim_time = Duration::from_secs_f64(4.0*SCALE);
    let commands = transport.commands();
    let starts:Vec<Instant> = commands.iter().filter(|(_,c)| *c == RenderCommand::StartStim).map(|(t,_)| *t).collect();
    let stops:Vec<Instant> = commands.iter().filter(|(_,c)| *c == RenderCommand::StopStim).map(|(t,_)| *t).collect();
    assert_eq!(starts.len(),3);
    assert_eq!(stops.len(),3);
    for (start,stop) in starts.iter().zip(&stops) {
        assert!(*stop - *start >= stim_time);
    }
    // every epoch: markers rise once and fall before the next load
    let markers:Vec<&RenderCommand> = commands.iter().map(|(_,c)| c)
        .filter(|c| matches!(c,RenderCommand::StartCornerSquare | RenderCommand::BlackCornerSquare))
        .collect();
    assert_eq!(markers.len(),7);
    assert!(markers.chunks(2).take(3).all(|m| *m[0] == RenderCommand::StartCornerSquare && *m[1] == RenderCommand::BlackCornerSquare));
}

#[test]
fn batches_keep_start_and_marker_together(){
    let transport = RecordingTransport::new();
    controller(&transport,0).run(&mut grating(&[0.0],2,false),None).unwrap();
    let batches = transport.batches();
    assert!(batches.iter().any(|b| b.commands == vec![RenderCommand::StartStim,RenderCommand::StartCornerSquare]));
    assert!(batches.iter().any(|b| b.commands == vec![RenderCommand::StopStim,RenderCommand::BlackCornerSquare]));
    assert_eq!(batches[0].commands,vec![RenderCommand::SetIdleBackground { color:0.5 }]);
}

#[test]
fn stop_ends_the_run_within_one_epoch(){
    let transport = RecordingTransport::new();
    let mut c = controller(&transport,0);
    let control = c.control();
    let epoch = Duration::from_secs_f64(6.0*SCALE);

    let stopper = thread::spawn(move ||{
        while !matches!(control.state(),RunState::Running { epoch:1 }) {
            thread::sleep(Duration::from_millis(1));
        }
        thread::sleep(Duration::from_millis(15));
        control.stop();
        Instant::now()
    });
    c.run(&mut grating(&[0.0,90.0],50,false),None).unwrap();
    let ended = Instant::now();
    let stopped_at = stopper.join().unwrap();

    // generous slack for a loaded test machine
    assert!(ended - stopped_at <= epoch + c.options().poll_interval + Duration::from_millis(100));
    let starts = transport.commands().iter().filter(|(_,c)| *c == RenderCommand::StartStim).count();
    assert!(starts < 50);
}
