//! Plain-text and JSON output files
//!
//! Every writer is given its full path; the run controller decides names
//! (`<id>_logging.txt`, `<id>_layers.txt`, ...) and whether a folder is
//! configured at all.

use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::settings::Settings;

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("cannot write '{}'", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot serialize output: {0}")]
    Serialize(#[from] serde_json::Error),
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> OutputError + '_ {
    move |source| OutputError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn create_file(path: &Path) -> Result<BufWriter<File>, OutputError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_error(path))?;
    }
    File::create(path).map(BufWriter::new).map_err(io_error(path))
}

/// One line of the logging file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LoggingRow {
    pub time: f64,
    pub num_particles: u64,
    pub particle_volume: f64,
    pub maximum_height: f64,
    pub height_of_mass: f64,
    pub maximum_velocity: f64,
    pub num_contacts: u64,
    pub maximum_penetration_depth: f64,
    pub average_penetration_depth: f64,
    pub porosity: f64,
}

/// Time series of aggregate statistics, appended once per logging interval.
pub struct LoggingWriter {
    path: PathBuf,
    out: BufWriter<File>,
}

impl LoggingWriter {
    pub fn create(path: impl Into<PathBuf>) -> Result<Self, OutputError> {
        let path = path.into();
        let mut out = create_file(&path)?;
        writeln!(
            out,
            "# t numParticles particleVolume maxHeight heightOfMass maxVelocity numContacts maxPenetration avgPenetration porosity"
        )
        .map_err(io_error(&path))?;
        Ok(Self { path, out })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&mut self, row: &LoggingRow) -> Result<(), OutputError> {
        writeln!(
            self.out,
            "{} {} {} {} {} {} {} {} {} {}",
            row.time,
            row.num_particles,
            row.particle_volume,
            row.maximum_height,
            row.height_of_mass,
            row.maximum_velocity,
            row.num_contacts,
            row.maximum_penetration_depth,
            row.average_penetration_depth,
            row.porosity
        )
        .and_then(|_| self.out.flush())
        .map_err(io_error(&self.path))
    }
}

/// Writes a whitespace separated table with a commented header line.
pub fn write_table(path: &Path, header: &[&str], rows: &[Vec<f64>]) -> Result<(), OutputError> {
    let mut out = create_file(path)?;
    let write = |out: &mut BufWriter<File>| -> std::io::Result<()> {
        writeln!(out, "# {}", header.join(" "))?;
        for row in rows {
            let line: Vec<String> = row.iter().map(|v| v.to_string()).collect();
            writeln!(out, "{}", line.join(" "))?;
        }
        out.flush()
    };
    write(&mut out).map_err(io_error(path))
}

/// Per-particle state written to particle info files and snapshots.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParticleRecord {
    pub uid: u64,
    pub owner: usize,
    pub shape: &'static str,
    pub position: [f64; 3],
    pub linear_velocity: [f64; 3],
    pub semi_axes: [f64; 3],
    pub interaction_radius: f64,
    pub size: f64,
    pub num_contacts: u32,
}

/// Writes one line per particle with fixed precision.
pub fn write_particle_info(path: &Path, particles: &[ParticleRecord], precision: usize) -> Result<(), OutputError> {
    let mut out = create_file(path)?;
    let write = |out: &mut BufWriter<File>| -> std::io::Result<()> {
        writeln!(out, "# uid owner shape x y z semiAxisS semiAxisI semiAxisL size interactionRadius numContacts")?;
        for p in particles {
            writeln!(
                out,
                "{} {} {} {:.prec$} {:.prec$} {:.prec$} {:.prec$} {:.prec$} {:.prec$} {:.prec$} {:.prec$} {}",
                p.uid,
                p.owner,
                p.shape,
                p.position[0],
                p.position[1],
                p.position[2],
                p.semi_axes[0],
                p.semi_axes[1],
                p.semi_axes[2],
                p.size,
                p.interaction_radius,
                p.num_contacts,
                prec = precision
            )?;
        }
        out.flush()
    };
    write(&mut out).map_err(io_error(path))
}

#[derive(Serialize)]
struct Snapshot<'a> {
    step: u64,
    time: f64,
    particles: &'a [ParticleRecord],
}

/// JSON particle snapshots named `<base>_<step>.json` inside one folder.
pub struct SnapshotWriter {
    folder: PathBuf,
    base_name: String,
}

impl SnapshotWriter {
    pub fn new(folder: impl Into<PathBuf>, base_name: impl Into<String>) -> Self {
        Self {
            folder: folder.into(),
            base_name: base_name.into(),
        }
    }

    pub fn path_for(&self, step: u64) -> PathBuf {
        self.folder.join(format!("{}_{}.json", self.base_name, step))
    }

    pub fn write(&self, step: u64, time: f64, particles: &[ParticleRecord]) -> Result<PathBuf, OutputError> {
        let path = self.path_for(step);
        let mut out = create_file(&path)?;
        serde_json::to_writer(&mut out, &Snapshot { step, time, particles })?;
        out.flush().map_err(io_error(&path))?;
        Ok(path)
    }
}

/// Stores the resolved settings next to the final snapshot.
pub fn write_settings_copy(path: &Path, settings: &Settings) -> Result<(), OutputError> {
    let text = settings.to_json_pretty()?;
    let mut out = create_file(path)?;
    out.write_all(text.as_bytes())
        .and_then(|_| out.flush())
        .map_err(io_error(path))
}
