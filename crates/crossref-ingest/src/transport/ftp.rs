//! suppaftp-backed sessions

use std::io::{Read, Write};
use suppaftp::types::FileType;
use suppaftp::{FtpStream, Mode};
use tracing::debug;

use super::{Connector, FtpSession};
use crate::error::TransportError;

/// Connection parameters for the metadata FTP server
#[derive(Debug, Clone)]
pub struct FtpConfig {
    pub host: String,
    pub port: u16,
    pub login: String,
    pub password: String,
}

impl Default for FtpConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 21,
            login: "anonymous".to_string(),
            password: "anonymous@example.com".to_string(),
        }
    }
}

/// Opens binary-mode, extended-passive sessions
#[derive(Debug, Clone)]
pub struct FtpConnector {
    config: FtpConfig,
}

impl FtpConnector {
    pub fn new(config: FtpConfig) -> Self {
        Self { config }
    }
}

impl Connector for FtpConnector {
    type Session = FtpStream;

    fn connect(&self) -> Result<FtpStream, TransportError> {
        debug!("Connecting to FTP server: {}:{}", self.config.host, self.config.port);

        let mut stream = FtpStream::connect(format!("{}:{}", self.config.host, self.config.port))?;

        // EPSV behaves better behind NAT and in containers
        stream.set_mode(Mode::ExtendedPassive);

        debug!("Logging in as: {}", self.config.login);
        stream.login(&self.config.login, &self.config.password)?;
        stream.transfer_type(FileType::Binary)?;

        Ok(stream)
    }
}

impl FtpSession for FtpStream {
    fn change_dir(&mut self, path: &str) -> Result<(), TransportError> {
        self.cwd(path)?;
        Ok(())
    }

    fn name_list(&mut self) -> Result<Vec<String>, TransportError> {
        Ok(self.nlst(None)?)
    }

    fn make_dir(&mut self, path: &str) -> Result<(), TransportError> {
        self.mkdir(path)?;
        Ok(())
    }

    fn retrieve(&mut self, remote: &str, dest: &mut dyn Write) -> Result<u64, TransportError> {
        let mut data = self.retr_as_stream(remote)?;
        let bytes = std::io::copy(&mut data, dest)?;
        self.finalize_retr_stream(data)?;
        Ok(bytes)
    }

    fn store(&mut self, remote: &str, mut src: &mut dyn Read) -> Result<u64, TransportError> {
        Ok(self.put_file(remote, &mut src)?)
    }

    fn logout(&mut self) -> Result<(), TransportError> {
        self.quit()?;
        Ok(())
    }
}
