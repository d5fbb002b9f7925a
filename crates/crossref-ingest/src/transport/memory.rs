//! In-memory FTP server for transport and source tests

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::io::{Read, Write};
use std::sync::{Arc, Mutex};

use super::{Connector, FtpSession};
use crate::error::TransportError;

#[derive(Debug, Clone, Copy)]
pub(crate) enum Fault {
    Disconnect,
    Permanent,
}

#[derive(Default)]
struct State {
    dirs: BTreeSet<String>,
    files: BTreeMap<String, Vec<u8>>,
    faults: VecDeque<Fault>,
    broken: BTreeSet<String>,
    connects: usize,
    operations: usize,
}

/// Cheap to clone; every clone sees the same server
#[derive(Clone, Default)]
pub(crate) struct MemoryFtp {
    state: Arc<Mutex<State>>,
}

impl MemoryFtp {
    pub(crate) fn new() -> Self {
        let ftp = Self::default();
        ftp.add_dir("/");
        ftp
    }

    pub(crate) fn add_dir(&self, path: &str) {
        self.state.lock().unwrap().dirs.insert(path.to_string());
    }

    pub(crate) fn add_file(&self, path: &str, data: &[u8]) {
        self.state
            .lock()
            .unwrap()
            .files
            .insert(path.to_string(), data.to_vec());
    }

    pub(crate) fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.state.lock().unwrap().files.get(path).cloned()
    }

    /// The next `count` commands fail with `fault`
    pub(crate) fn inject(&self, fault: Fault, count: usize) {
        let mut state = self.state.lock().unwrap();
        state.faults.extend(std::iter::repeat(fault).take(count));
    }

    /// Every RETR of `path` fails permanently
    pub(crate) fn break_file(&self, path: &str) {
        self.state.lock().unwrap().broken.insert(path.to_string());
    }

    pub(crate) fn connects(&self) -> usize {
        self.state.lock().unwrap().connects
    }

    pub(crate) fn operations(&self) -> usize {
        self.state.lock().unwrap().operations
    }
}

impl Connector for MemoryFtp {
    type Session = MemorySession;

    fn connect(&self) -> Result<MemorySession, TransportError> {
        self.state.lock().unwrap().connects += 1;
        Ok(MemorySession {
            state: self.state.clone(),
            cwd: "/".to_string(),
        })
    }
}

pub(crate) struct MemorySession {
    state: Arc<Mutex<State>>,
    cwd: String,
}

impl MemorySession {
    fn resolve(&self, path: &str) -> String {
        if path.starts_with('/') {
            path.to_string()
        } else if self.cwd == "/" {
            format!("/{}", path)
        } else {
            format!("{}/{}", self.cwd, path)
        }
    }

    fn command(&self) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();
        state.operations += 1;
        match state.faults.pop_front() {
            Some(Fault::Disconnect) => Err(TransportError::TransientDisconnect(
                "421 Service not available".to_string(),
            )),
            Some(Fault::Permanent) => {
                Err(TransportError::Permanent("530 Not logged in".to_string()))
            },
            None => Ok(()),
        }
    }
}

fn parent(path: &str) -> &str {
    match path.rsplit_once('/') {
        Some(("", _)) => "/",
        Some((parent, _)) => parent,
        None => "/",
    }
}

impl FtpSession for MemorySession {
    fn change_dir(&mut self, path: &str) -> Result<(), TransportError> {
        self.command()?;
        let target = self.resolve(path);
        if !self.state.lock().unwrap().dirs.contains(&target) {
            return Err(TransportError::Permanent(format!("550 {}: no such directory", target)));
        }
        self.cwd = target;
        Ok(())
    }

    fn name_list(&mut self) -> Result<Vec<String>, TransportError> {
        self.command()?;
        let state = self.state.lock().unwrap();
        let mut names: Vec<String> = state
            .files
            .keys()
            .chain(state.dirs.iter())
            .filter(|path| path.as_str() != "/" && parent(path) == self.cwd)
            .filter_map(|path| path.rsplit('/').next().map(str::to_string))
            .collect();
        // real servers make no ordering promise
        names.reverse();
        Ok(names)
    }

    fn make_dir(&mut self, path: &str) -> Result<(), TransportError> {
        self.command()?;
        let target = self.resolve(path);
        self.state.lock().unwrap().dirs.insert(target);
        Ok(())
    }

    fn retrieve(&mut self, remote: &str, dest: &mut dyn Write) -> Result<u64, TransportError> {
        self.command()?;
        let target = self.resolve(remote);
        let data = {
            let state = self.state.lock().unwrap();
            if state.broken.contains(&target) {
                return Err(TransportError::Permanent(format!("451 {}: read error", target)));
            }
            state
                .files
                .get(&target)
                .cloned()
                .ok_or_else(|| TransportError::Permanent(format!("550 {}: not found", target)))?
        };
        dest.write_all(&data)?;
        Ok(data.len() as u64)
    }

    fn store(&mut self, remote: &str, src: &mut dyn Read) -> Result<u64, TransportError> {
        self.command()?;
        let target = self.resolve(remote);
        let mut data = Vec::new();
        src.read_to_end(&mut data)?;
        let len = data.len() as u64;
        self.state.lock().unwrap().files.insert(target, data);
        Ok(len)
    }
}
