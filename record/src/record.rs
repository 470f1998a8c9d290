/*
    The experiment record is a single file holding a tree of groups:

        <root>                                attrs: date, init_time, data_directory, experimenter, rig_name ...
          Subjects/<subject_id>               attrs: subject_id, init_time, user metadata ...
            epoch_runs/series_<NNN>           attrs: run_start_time, run parameters, protocol parameters
              acquisition
              epochs/epoch_<MMM>              attrs: epoch_time, epoch parameters, convenience parameters
              stimulus_timing
          Notes                               attrs: <timestamp> = <text>

    Every write opens the file, mutates the tree and writes it back. Nothing is held open between calls.
 */
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use serde_json::{Map, Value};
use tracing::{debug, info};
use utils;
use crate::attr::{AttrValue, Attrs};
use crate::group::Group;

pub const SUBJECTS:&str = "Subjects";
pub const NOTES:&str = "Notes";
pub const EPOCH_RUNS:&str = "epoch_runs";
pub const EPOCHS:&str = "epochs";
pub const ACQUISITION:&str = "acquisition";
pub const STIMULUS_TIMING:&str = "stimulus_timing";

#[derive(Debug,thiserror::Error)]
pub enum RecordError {
    #[error("a record file already exists at {0:?}")]
    RecordExists(PathBuf),
    #[error("the directory for {0:?} does not exist")]
    BadPath(PathBuf),
    #[error("no record file has been initialized")]
    NotInitialized,
    #[error("no subject is selected")]
    NoSubject,
    #[error("no series has been created on this record")]
    NoSeries,
    #[error("subject {0} does not exist")]
    UnknownSubject(String),
    #[error("subject {0} already exists")]
    DuplicateSubject(String),
    #[error("series {0} already exists in this record")]
    SeriesCollision(u32),
    #[error("subject metadata must contain subject_id or animal_id")]
    MissingSubjectId,
    #[error("subject id {0:?} may not contain '/'")]
    InvalidSubjectId(String),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// what a protocol hands to the record when a series starts
pub trait SeriesMetadata {
    fn run_attributes(&self) -> Attrs;
    fn protocol_attributes(&self) -> Attrs;
}

/// what a protocol hands to the record for every epoch
pub trait EpochMetadata {
    /// a single mapping, or a list of mappings for layered stimuli
    fn epoch_parameters(&self) -> Value;
    fn convenience_parameters(&self) -> Map<String,Value>;
}

#[derive(Clone,Debug,Default)]
pub struct ExperimentMetadata {
    pub experimenter:String,
    pub rig_name:String,
    pub rig_attributes:Attrs,
    pub extra:Attrs,
}

#[derive(Debug)]
pub struct ExperimentRecord {
    file:PathBuf,
    current_subject:Option<String>,
    current_series:Option<u32>,
    series_count:u32,
}

impl ExperimentRecord {

    /// creates a new record file. Never overwrites an existing one.
    pub fn initialize(path:&Path,metadata:&ExperimentMetadata) -> Result<Self,RecordError> {
        if path.exists() {
            return Err(RecordError::RecordExists(path.to_owned()))
        }
        let data_dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_owned(),
            _=> PathBuf::from("."),
        };
        if !data_dir.is_dir() {
            return Err(RecordError::BadPath(path.to_owned()))
        }
        let data_dir = fs::canonicalize(&data_dir)?;

        let t = utils::now();
        let mut root = Group::default();
        root.attrs.insert("date".into(),utils::date_stamp(&t).into());
        root.attrs.insert("init_time".into(),utils::time_stamp(&t).into());
        root.attrs.insert("data_directory".into(),data_dir.to_string_lossy().to_string().into());
        root.attrs.insert("experimenter".into(),metadata.experimenter.clone().into());
        root.attrs.insert("rig_name".into(),metadata.rig_name.clone().into());
        root.attrs.extend(metadata.rig_attributes.clone());
        root.attrs.extend(metadata.extra.clone());
        root.require_group(SUBJECTS);
        root.require_group(NOTES);

        let record = Self {
            file:path.to_owned(),
            current_subject:None,
            current_series:None,
            series_count:1,
        };
        record.save(&root)?;
        info!(file = ?path,"initialized experiment record");
        Ok(record)
    }

    /// opens an existing record and sets the next series number to one past the largest on disk
    pub fn open(path:&Path) -> Result<Self,RecordError> {
        if !path.is_file() {
            return Err(RecordError::NotInitialized)
        }
        let mut record = Self {
            file:path.to_owned(),
            current_subject:None,
            current_series:None,
            series_count:1,
        };
        record.reload_series_count()?;
        info!(file = ?path,next_series = record.series_count,"opened experiment record");
        Ok(record)
    }

    pub fn file(&self) -> &Path {
        &self.file
    }

    pub fn exists(&self) -> bool {
        self.file.is_file()
    }

    /// read the whole tree
    pub fn load(&self) -> Result<Group,RecordError> {
        if !self.exists() {
            return Err(RecordError::NotInitialized)
        }
        let s = fs::read_to_string(&self.file)?;
        Ok(serde_json::from_str(&s)?)
    }

    fn save(&self,root:&Group) -> Result<(),RecordError> {
        let s = serde_json::to_string_pretty(root)?;
        utils::write_atomic(&self.file,&s)?;
        Ok(())
    }

    // the file is only written if the mutation succeeds
    fn modify<T,F>(&self,f:F) -> Result<T,RecordError>
    where F:FnOnce(&mut Group) -> Result<T,RecordError>
    {
        let mut root = self.load()?;
        let out = f(&mut root)?;
        self.save(&root)?;
        Ok(out)
    }

    pub fn subject_exists(&self,subject_id:&str) -> Result<bool,RecordError> {
        let root = self.load()?;
        Ok(root.get(&format!("{}/{}",SUBJECTS,subject_id)).is_some())
    }

    pub fn subject_ids(&self) -> Result<Vec<String>,RecordError> {
        let root = self.load()?;
        Ok(root.get(SUBJECTS).map(|g| g.child_names()).unwrap_or_default())
    }

    /// adds a subject node and makes it the current subject
    pub fn create_subject(&mut self,metadata:&Attrs) -> Result<String,RecordError> {
        let subject_id = metadata.get("subject_id")
            .or_else(|| metadata.get("animal_id"))
            .map(|v| v.to_string())
            .filter(|id| !id.is_empty())
            .ok_or(RecordError::MissingSubjectId)?;
        // ids are path components of the tree
        if subject_id.contains('/') {
            return Err(RecordError::InvalidSubjectId(subject_id))
        }

        let t = utils::now();
        self.modify(|root|{
            let subjects = root.require_group(SUBJECTS);
            if subjects.groups.contains_key(&subject_id) {
                return Err(RecordError::DuplicateSubject(subject_id.clone()))
            }
            let mut attrs = metadata.clone();
            attrs.insert("subject_id".into(),subject_id.clone().into());
            attrs.insert("init_time".into(),utils::time_stamp(&t).into());
            let mut subject = Group::with_attrs(attrs);
            subject.require_group(EPOCH_RUNS);
            subjects.groups.insert(subject_id.clone(),subject);
            Ok(())
        })?;
        info!(subject = %subject_id,"created subject");
        self.current_subject = Some(subject_id.clone());
        Ok(subject_id)
    }

    pub fn select_subject(&mut self,subject_id:&str) -> Result<(),RecordError> {
        match self.subject_exists(subject_id)? {
            true => {
                self.current_subject = Some(subject_id.to_string());
                Ok(())
            }
            false => Err(RecordError::UnknownSubject(subject_id.to_string()))
        }
    }

    pub fn current_subject(&self) -> Option<&str> {
        self.current_subject.as_deref()
    }

    pub fn current_series(&self) -> Option<u32> {
        self.current_series
    }

    /// appends series_<series_count> under the current subject
    pub fn create_series<S:SeriesMetadata + ?Sized>(&mut self,source:&S) -> Result<u32,RecordError> {
        if !self.exists() {
            return Err(RecordError::NotInitialized)
        }
        let subject_id = self.current_subject.clone().ok_or(RecordError::NoSubject)?;
        let series = self.series_count;
        let t = utils::now();

        self.modify(|root|{
            if Self::series_numbers(root).contains(&series) {
                return Err(RecordError::SeriesCollision(series))
            }
            let subject = root.get_mut(&format!("{}/{}",SUBJECTS,subject_id))
                .ok_or_else(|| RecordError::UnknownSubject(subject_id.clone()))?;

            let mut attrs = Attrs::new();
            attrs.insert("run_start_time".into(),utils::time_stamp(&t).into());
            attrs.insert("run_start_unix_time".into(),utils::unix_seconds(&t).into());
            attrs.extend(source.run_attributes());
            attrs.extend(source.protocol_attributes());

            let mut node = Group::with_attrs(attrs);
            node.require_group(ACQUISITION);
            node.require_group(EPOCHS);
            node.require_group(STIMULUS_TIMING);
            subject.require_group(EPOCH_RUNS).groups.insert(utils::series_name(series),node);
            Ok(())
        })?;

        info!(series,subject = %subject_id,"created series");
        self.current_series = Some(series);
        Ok(series)
    }

    /// appends the next epoch under the current series. Returns the epoch number.
    pub fn create_epoch<E:EpochMetadata + ?Sized>(&self,source:&E) -> Result<u32,RecordError> {
        let series = self.current_series.ok_or(RecordError::NoSeries)?;
        let t = utils::now();

        let mut attrs = Attrs::new();
        attrs.insert("epoch_time".into(),utils::unix_seconds(&t).into());
        match source.epoch_parameters() {
            Value::Array(layers) => {
                for (index,layer) in layers.iter().enumerate() {
                    if let Value::Object(map) = layer {
                        for (key,val) in map {
                            attrs.insert(format!("stim{}_{}",index,key),AttrValue::encode(val));
                        }
                    }
                }
            }
            Value::Object(map) => attrs.extend(AttrValue::encode_map(&map)),
            other => {
                attrs.insert("epoch_parameters".into(),AttrValue::encode(&other));
            }
        }
        attrs.extend(AttrValue::encode_map(&source.convenience_parameters()));

        let epoch = self.modify(|root|{
            let node = Self::series_group_mut(root,series)
                .ok_or(RecordError::NoSeries)?;
            let epochs = node.require_group(EPOCHS);
            let epoch = epochs.groups.len() as u32 + 1;
            epochs.groups.insert(utils::epoch_name(epoch),Group::with_attrs(attrs));
            Ok(epoch)
        })?;
        debug!(series,epoch,"created epoch");
        Ok(epoch)
    }

    pub fn create_note(&self,text:&str) -> Result<(),RecordError> {
        let t = utils::now();
        let stamp = format!("{} {}",utils::date_stamp(&t),utils::time_stamp(&t));
        self.modify(|root|{
            root.require_group(NOTES).attrs.insert(stamp,text.into());
            Ok(())
        })
    }

    pub fn notes(&self) -> Result<Attrs,RecordError> {
        let root = self.load()?;
        Ok(root.get(NOTES).map(|g| g.attrs.clone()).unwrap_or_default())
    }

    /// all series numbers in the file, across subjects
    pub fn get_existing_series(&self) -> Result<BTreeSet<u32>,RecordError> {
        let root = self.load()?;
        Ok(Self::series_numbers(&root))
    }

    fn series_numbers(root:&Group) -> BTreeSet<u32> {
        let mut numbers = BTreeSet::new();
        if let Some(subjects) = root.get(SUBJECTS) {
            for subject in subjects.groups.values() {
                if let Some(runs) = subject.get(EPOCH_RUNS) {
                    numbers.extend(runs.groups.keys().filter_map(|name| utils::node_number(name,"series")));
                }
            }
        }
        numbers
    }

    fn series_group(root:&Group,series:u32) -> Option<&Group> {
        let name = utils::series_name(series);
        root.get(SUBJECTS)?
            .groups.values()
            .find_map(|subject| subject.get(EPOCH_RUNS).and_then(|runs| runs.groups.get(&name)))
    }

    fn series_group_mut(root:&mut Group,series:u32) -> Option<&mut Group> {
        let name = utils::series_name(series);
        root.get_mut(SUBJECTS)?
            .groups.values_mut()
            .find_map(|subject| subject.get_mut(EPOCH_RUNS).and_then(|runs| runs.groups.get_mut(&name)))
    }

    pub fn series_attrs(&self,series:u32) -> Result<Option<Attrs>,RecordError> {
        let root = self.load()?;
        Ok(Self::series_group(&root,series).map(|g| g.attrs.clone()))
    }

    pub fn epoch_names(&self,series:u32) -> Result<Vec<String>,RecordError> {
        let root = self.load()?;
        Ok(Self::series_group(&root,series)
            .and_then(|g| g.get(EPOCHS))
            .map(|g| g.child_names())
            .unwrap_or_default())
    }

    pub fn epoch_count(&self,series:u32) -> Result<usize,RecordError> {
        Ok(self.epoch_names(series)?.len())
    }

    pub fn epoch_attrs(&self,series:u32,epoch:u32) -> Result<Option<Attrs>,RecordError> {
        let root = self.load()?;
        Ok(Self::series_group(&root,series)
            .and_then(|g| g.get(EPOCHS))
            .and_then(|g| g.groups.get(&utils::epoch_name(epoch)))
            .map(|g| g.attrs.clone()))
    }

    pub fn series_count(&self) -> u32 {
        self.series_count
    }

    pub fn advance_series_count(&mut self) {
        self.series_count += 1;
    }

    pub fn update_series_count(&mut self,series:u32) {
        self.series_count = series;
    }

    pub fn reload_series_count(&mut self) -> Result<u32,RecordError> {
        let existing = self.get_existing_series()?;
        self.series_count = existing.iter().next_back().map(|max| max + 1).unwrap_or(1);
        Ok(self.series_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct FakeRun;

    impl SeriesMetadata for FakeRun {
        fn run_attributes(&self) -> Attrs {
            let mut a = Attrs::new();
            a.insert("protocol_ID".into(),"DriftingGrating".into());
            a.insert("num_epochs".into(),AttrValue::Int(4));
            a.insert("stim_time".into(),AttrValue::Float(4.0));
            a
        }
        fn protocol_attributes(&self) -> Attrs {
            let mut a = Attrs::new();
            a.insert("period".into(),AttrValue::Float(20.0));
            a.insert("angle".into(),AttrValue::encode(&json!([0.0,90.0])));
            a
        }
    }

    struct FakeEpoch(Value);

    impl EpochMetadata for FakeEpoch {
        fn epoch_parameters(&self) -> Value {
            self.0.clone()
        }
        fn convenience_parameters(&self) -> Map<String,Value> {
            let mut m = Map::new();
            m.insert("current_angle".into(),json!(90.0));
            m
        }
    }

    fn metadata() -> ExperimentMetadata {
        ExperimentMetadata {
            experimenter:String::from("tester"),
            rig_name:String::from("bruker"),
            ..Default::default()
        }
    }

    fn new_record(dir:&Path) -> ExperimentRecord {
        ExperimentRecord::initialize(&dir.join("2026-10-19.json"),&metadata()).unwrap()
    }

    fn subject(id:&str) -> Attrs {
        let mut a = Attrs::new();
        a.insert("animal_id".into(),id.into());
        a
    }

    #[test]
    fn initialize_refuses_existing_file(){
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exp.json");
        ExperimentRecord::initialize(&path,&metadata()).unwrap();
        let err = ExperimentRecord::initialize(&path,&metadata()).unwrap_err();
        assert!(matches!(err,RecordError::RecordExists(_)));
    }

    #[test]
    fn initialize_requires_parent_dir(){
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("exp.json");
        let err = ExperimentRecord::initialize(&path,&metadata()).unwrap_err();
        assert!(matches!(err,RecordError::BadPath(_)));
    }

    #[test]
    fn root_attributes_are_written(){
        let dir = tempfile::tempdir().unwrap();
        let r = new_record(dir.path());
        let root = r.load().unwrap();
        assert_eq!(root.attrs["experimenter"],AttrValue::from("tester"));
        assert_eq!(root.attrs["rig_name"],AttrValue::from("bruker"));
        let data_dir = root.attrs["data_directory"].as_str().unwrap().to_string();
        assert!(Path::new(&data_dir).is_dir());
        assert!(root.get(SUBJECTS).is_some());
    }

    #[test]
    fn duplicate_subject_is_refused(){
        let dir = tempfile::tempdir().unwrap();
        let mut r = new_record(dir.path());
        r.create_subject(&subject("A1")).unwrap();
        let err = r.create_subject(&subject("A1")).unwrap_err();
        assert!(matches!(err,RecordError::DuplicateSubject(ref id) if id == "A1"));
        assert_eq!(r.subject_ids().unwrap(),vec!["A1".to_string()]);
        assert_eq!(r.current_subject(),Some("A1"));
    }

    #[test]
    fn subject_ids_with_a_slash_are_refused(){
        let dir = tempfile::tempdir().unwrap();
        let mut r = new_record(dir.path());
        let err = r.create_subject(&subject("cage2/A1")).unwrap_err();
        assert!(matches!(err,RecordError::InvalidSubjectId(ref id) if id == "cage2/A1"));
        assert!(r.subject_ids().unwrap().is_empty());
        assert_eq!(r.current_subject(),None);
    }

    #[test]
    fn series_requires_a_subject(){
        let dir = tempfile::tempdir().unwrap();
        let mut r = new_record(dir.path());
        assert!(matches!(r.create_series(&FakeRun).unwrap_err(),RecordError::NoSubject));
    }

    #[test]
    fn series_and_epochs_are_appended(){
        let dir = tempfile::tempdir().unwrap();
        let mut r = new_record(dir.path());
        r.create_subject(&subject("A1")).unwrap();
        let series = r.create_series(&FakeRun).unwrap();
        assert_eq!(series,1);
        for _ in 0..3 {
            r.create_epoch(&FakeEpoch(json!({"name":"RotatingGrating","angle":90.0}))).unwrap();
        }
        assert_eq!(r.epoch_names(1).unwrap(),vec!["epoch_001","epoch_002","epoch_003"]);
        let attrs = r.series_attrs(1).unwrap().unwrap();
        assert_eq!(attrs["period"],AttrValue::Float(20.0));
        assert!(attrs.contains_key("run_start_time"));
        let epoch = r.epoch_attrs(1,2).unwrap().unwrap();
        assert_eq!(epoch["angle"].as_f64(),Some(90.0));
        assert_eq!(epoch["current_angle"].as_f64(),Some(90.0));
        let root = r.load().unwrap();
        assert!(root.get("Subjects/A1/epoch_runs/series_001/acquisition").is_some());
    }

    #[test]
    fn layered_epochs_are_prefixed(){
        let dir = tempfile::tempdir().unwrap();
        let mut r = new_record(dir.path());
        r.create_subject(&subject("A1")).unwrap();
        r.create_series(&FakeRun).unwrap();
        r.create_epoch(&FakeEpoch(json!([
            {"name":"ConstantBackground","color":0.5},
            {"name":"MovingPatch","theta":{"name":"tv_pairs","tv_pairs":[[0.0,1.0]],"kind":"linear"}}
        ]))).unwrap();
        let epoch = r.epoch_attrs(1,1).unwrap().unwrap();
        assert_eq!(epoch["stim0_name"],AttrValue::from("ConstantBackground"));
        assert_eq!(epoch["stim1_name"],AttrValue::from("MovingPatch"));
        let theta = epoch["stim1_theta"].as_mapping().unwrap();
        assert_eq!(theta["kind"],json!("linear"));
    }

    #[test]
    fn series_collision_leaves_file_untouched(){
        let dir = tempfile::tempdir().unwrap();
        let mut r = new_record(dir.path());
        r.create_subject(&subject("A1")).unwrap();
        r.update_series_count(5);
        r.create_series(&FakeRun).unwrap();
        let before = fs::read_to_string(r.file()).unwrap();
        r.create_subject(&subject("B2")).unwrap();
        let before_b2 = fs::read_to_string(r.file()).unwrap();
        assert_ne!(before,before_b2);
        r.update_series_count(5);
        let err = r.create_series(&FakeRun).unwrap_err();
        assert!(matches!(err,RecordError::SeriesCollision(5)));
        assert_eq!(fs::read_to_string(r.file()).unwrap(),before_b2);
    }

    #[test]
    fn open_resumes_series_numbering(){
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exp.json");
        {
            let mut r = ExperimentRecord::initialize(&path,&metadata()).unwrap();
            r.create_subject(&subject("A1")).unwrap();
            r.update_series_count(3);
            r.create_series(&FakeRun).unwrap();
        }
        let r = ExperimentRecord::open(&path).unwrap();
        assert_eq!(r.series_count(),4);
        assert_eq!(r.get_existing_series().unwrap().into_iter().collect::<Vec<_>>(),vec![3]);
    }

    #[test]
    fn notes_are_timestamped(){
        let dir = tempfile::tempdir().unwrap();
        let r = new_record(dir.path());
        r.create_note("prep looks healthy").unwrap();
        let notes = r.notes().unwrap();
        assert_eq!(notes.len(),1);
        assert_eq!(notes.values().next().unwrap(),&AttrValue::from("prep looks healthy"));
    }

    #[test]
    fn epoch_needs_a_series(){
        let dir = tempfile::tempdir().unwrap();
        let r = new_record(dir.path());
        let err = r.create_epoch(&FakeEpoch(json!({}))).unwrap_err();
        assert!(matches!(err,RecordError::NoSeries));
    }
}
