use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use chrono::{DateTime, Local};
use glob::glob;

pub const NODE_NUMBER_WIDTH:usize = 3;

/// zero-padded node name such as series_005 or epoch_012
pub fn node_name(prefix:&str,number:u32) -> String {
    format!("{}_{:0width$}",prefix,number,width=NODE_NUMBER_WIDTH)
}

pub fn series_name(number:u32) -> String {
    node_name("series",number)
}

pub fn epoch_name(number:u32) -> String {
    node_name("epoch",number)
}

/// recover the number from a node name produced by node_name
pub fn node_number(name:&str,prefix:&str) -> Option<u32> {
    name.strip_prefix(prefix)?
        .strip_prefix('_')?
        .parse()
        .ok()
}

pub fn read_to_string(filepath:&Path,extension:&str) -> io::Result<String> {
    let p = filepath.with_extension(extension);
    let mut f = File::open(&p)?;
    let mut s = String::new();
    f.read_to_string(&mut s)?;
    Ok(s)
}

/// write to a sibling temp file then rename over the target so readers never see a partial file
pub fn write_atomic(filepath:&Path,string:&str) -> io::Result<()> {
    let mut tmp_name = filepath.file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput,format!("not a file path: {:?}",filepath)))?
        .to_os_string();
    tmp_name.push(".tmp");
    let tmp = filepath.with_file_name(tmp_name);
    {
        let mut f = File::create(&tmp)?;
        f.write_all(string.as_bytes())?;
        f.sync_all()?;
    }
    fs::rename(&tmp,filepath)
}

// single depth search
pub fn get_all_matches(dir:&Path,pattern:&str) -> Option<Vec<PathBuf>> {
    let pat = dir.join(pattern);
    let pat = pat.to_str()?;
    let mut matches:Vec<PathBuf> = glob(pat).ok()?.flatten().collect();
    matches.sort();
    match matches.is_empty() {
        true => None,
        false => Some(matches)
    }
}

/// relative paths are taken relative to base_dir
pub fn resolve_path(base_dir:&Path,path:&Path) -> PathBuf {
    match path.is_absolute() {
        true => path.to_owned(),
        false => base_dir.join(path)
    }
}

pub fn now() -> DateTime<Local> {
    Local::now()
}

pub fn date_stamp(t:&DateTime<Local>) -> String {
    t.format("%Y-%m-%d").to_string()
}

pub fn time_stamp(t:&DateTime<Local>) -> String {
    t.format("%H:%M:%S%.3f").to_string()
}

/// seconds since the unix epoch with sub-second resolution
pub fn unix_seconds(t:&DateTime<Local>) -> f64 {
    t.timestamp_micros() as f64 / 1.0E6
}
