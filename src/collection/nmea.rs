//! Electromagnetic survey sensor speaking NMEA-style sentences.
//!
//! The instrument streams two kinds of proprietary sentences:
//!
//! ```text
//! $PDLM1,121507.20,18.31,2.45,20.12,1.87*5A   array reading (H = half-meter array)
//! $PDLMA,12.4,31.5,-0.6,1.2*3F                voltage, temperature, pitch, roll
//! ```
//!
//! A round is complete once both the configured array sentence and an `$PDLMA`
//! sentence were read. Writing `%` to the device asks it to emit the `$PDLMA`
//! status line, which is done at most once per second.
//!
//! The port is read with a [`READ_TIMEOUT`]; a silent device turns into failed
//! reads, so the worker keeps checking its stop signal and failure count.

use anyhow::{Context, anyhow};
use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value, json};
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use super::Sensor;
use crate::config::ProfileConfig;
use crate::telemetry::TelemetrySnapshot;

const STATUS_SENTENCE: &str = "$PDLMA";
const ARRAY_PREFIX: &str = "$PDLM";
const STATUS_REQUEST: &[u8] = b"%";
const STATUS_REQUEST_INTERVAL: Duration = Duration::from_secs(1);

/// How long one read may wait for the device.
pub const READ_TIMEOUT: Duration = Duration::from_secs(2);

fn field(fields: &[&str], index: usize, name: &str) -> anyhow::Result<f64> {
    let raw = fields.get(index).ok_or_else(|| anyhow!("missing {}", name))?;
    raw.trim().parse::<f64>().with_context(|| format!("bad {}: {:?}", name, raw))
}

/// Parse one sentence into its tag and decoded fields.
///
/// Returns `Ok(None)` for lines that are not sensor sentences and an error for
/// sensor sentences with malformed fields.
pub fn parse_sentence(line: &str) -> anyhow::Result<Option<(String, Value)>> {
    let Some(start) = line.find('$') else {
        return Ok(None);
    };
    let body = line[start..].split('*').next().unwrap_or_default().trim_end();
    let fields: Vec<&str> = body.split(',').collect();
    let tag = fields[0];

    if tag == STATUS_SENTENCE {
        let value = json!({
            "voltage": field(&fields, 1, "voltage")?,
            "temperature": field(&fields, 2, "temperature")?,
            "pitch": field(&fields, 3, "pitch")?,
            "roll": field(&fields, 4, "roll")?,
        });
        return Ok(Some((tag.to_string(), value)));
    }

    if let Some(array) = tag.strip_prefix(ARRAY_PREFIX).filter(|a| a.len() == 1) {
        let time = fields.get(1).ok_or_else(|| anyhow!("missing time"))?;
        let value = json!({
            // A letter for the half-meter array, so kept as text.
            "array_length": array,
            "time": time,
            "hcp_conductivity": field(&fields, 2, "hcp_conductivity")?,
            "hcp_inphase": field(&fields, 3, "hcp_inphase")?,
            "prp_conductivity": field(&fields, 4, "prp_conductivity")?,
            "prp_inphase": field(&fields, 5, "prp_inphase")?,
        });
        return Ok(Some((tag.to_string(), value)));
    }

    Ok(None)
}

pub struct NmeaSensor {
    reader: BufReader<Box<dyn Read + Send>>,
    /// Status requests go out on the same port.
    requests: Box<dyn Write + Send>,
    array_sentence: String,
    datastore: Option<PathBuf>,
    last_request: Option<Instant>,
    /// Current line; a read that timed out mid-line resumes it.
    line: String,
}

impl NmeaSensor {
    /// Open the configured serial device and, if set, create the local datastore path.
    pub fn open(profile: &ProfileConfig) -> anyhow::Result<Self> {
        let path = profile
            .device
            .as_deref()
            .ok_or_else(|| anyhow!("profile {} has no device", profile.profile_name))?;
        let port = serialport::new(path.to_string_lossy(), profile.baud)
            .data_bits(serialport::DataBits::Eight)
            .stop_bits(serialport::StopBits::One)
            .parity(serialport::Parity::None)
            .timeout(READ_TIMEOUT)
            .open()
            .with_context(|| format!("Failed to open sensor device: {}", path.display()))?;
        let requests = port.try_clone().context("Failed to clone sensor port")?;
        log::debug!("Opened {} at {} baud", path.display(), profile.baud);
        Self::from_streams(Box::new(port), Box::new(requests), profile)
    }

    fn from_streams(
        reader: Box<dyn Read + Send>,
        requests: Box<dyn Write + Send>,
        profile: &ProfileConfig,
    ) -> anyhow::Result<Self> {
        let model = profile.model.as_deref().unwrap_or("1s");
        let array = model.chars().next().unwrap_or('1');

        let datastore = match &profile.datastore_dir {
            Some(dir) => Some(datastore_file(dir, &profile.profile_name)?),
            None => None,
        };

        Ok(Self {
            reader: BufReader::new(reader),
            requests,
            array_sentence: format!("{}{}", ARRAY_PREFIX, array),
            datastore,
            last_request: None,
            line: String::with_capacity(128),
        })
    }

    fn request_status(&mut self) {
        let due = self.last_request.is_none_or(|at| at.elapsed() > STATUS_REQUEST_INTERVAL);
        if !due {
            return;
        }
        self.last_request = Some(Instant::now());
        if let Err(e) = self.requests.write_all(STATUS_REQUEST).and_then(|()| self.requests.flush()) {
            log::debug!("Status request not written: {}", e);
        }
    }

    fn next_line(&mut self) -> anyhow::Result<String> {
        match self.reader.read_line(&mut self.line) {
            Ok(0) if self.line.is_empty() => Err(anyhow!("sensor stream closed")),
            Ok(_) => {
                let line = self.line.trim_end().to_string();
                self.line.clear();
                Ok(line)
            }
            Err(e) if e.kind() == ErrorKind::TimedOut => Err(anyhow!("no data from sensor within {:?}", READ_TIMEOUT)),
            Err(e) => {
                self.line.clear();
                Err(e).context("Failed to read sensor")
            }
        }
    }

    fn store(&self, round: &Map<String, Value>) -> anyhow::Result<()> {
        let Some(path) = &self.datastore else {
            return Ok(());
        };
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{}", Value::Object(round.clone()))?;
        Ok(())
    }
}

fn datastore_file(dir: &Path, profile_name: &str) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(dir).with_context(|| format!("Failed to create datastore: {}", dir.display()))?;
    let started = Utc::now().format("%Y-%m-%dT%H-%M-%S");
    Ok(dir.join(format!("{}_{}.txt", profile_name, started)))
}

impl Sensor for NmeaSensor {
    fn read(&mut self, telemetry: &TelemetrySnapshot) -> anyhow::Result<Option<Value>> {
        self.request_status();

        let mut round = Map::new();
        while !(round.contains_key(&self.array_sentence) && round.contains_key(STATUS_SENTENCE)) {
            let line = self.next_line()?;
            if let Some((tag, value)) = parse_sentence(&line)? {
                round.insert(tag, value);
            }
        }

        round.insert(
            "utc_datetime".into(),
            json!(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)),
        );
        if let Some(gps) = telemetry.gps() {
            round.insert("lat".into(), json!(gps.position.lat));
            round.insert("lon".into(), json!(gps.position.lon));
            round.insert("sats_visible".into(), json!(gps.sats_visible));
            round.insert("sat_fix".into(), json!(gps.fix_type));
        }

        if let Err(e) = self.store(&round) {
            log::warn!("Failed to write local datastore: {:#}", e);
        }
        Ok(Some(Value::Object(round)))
    }

    fn pause(&self) -> Duration {
        Duration::ZERO
    }
}
