// meridian_core/src/models/imu.rs

use crate::error::ImuError;
use nalgebra::Vector3;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::str::{FromStr, SplitWhitespace};

/// Status/mode value used when a record did not provide one.
pub const INVALID_STATUS: i32 = -1;

/// One inertial/GNSS navigation record (OXTS layout).
///
/// Only `roll` and `pitch` feed the pose graph; the rest is carried so that a
/// record survives parsing intact and can be inspected or logged.
#[derive(Debug, Clone, PartialEq)]
pub struct ImuSample {
    pub timestamp: f64,

    // --- Position (GNSS) ---
    pub lat: f64,
    pub lon: f64,
    pub alt: f64,

    // --- Orientation, radians ---
    pub roll: f64,
    pub pitch: f64,
    pub yaw: f64,

    // --- Linear velocities ---
    pub vn: f64,
    pub ve: f64,
    pub vf: f64,
    pub vl: f64,
    pub vu: f64,

    // --- Accelerations ---
    pub ax: f64,
    pub ay: f64,
    pub az: f64,
    pub af: f64,
    pub al: f64,
    pub au: f64,

    // --- Angular rates ---
    pub wx: f64,
    pub wy: f64,
    pub wz: f64,
    pub wf: f64,
    pub wl: f64,
    pub wu: f64,

    // --- Accuracy and status ---
    pub pos_accuracy: f64,
    pub vel_accuracy: f64,
    pub navstat: i32,
    pub numsats: i32,
    pub posmode: i32,
    pub velmode: i32,
    pub orimode: i32,
}

impl Default for ImuSample {
    fn default() -> Self {
        Self {
            timestamp: 0.0,
            lat: 0.0,
            lon: 0.0,
            alt: 0.0,
            roll: 0.0,
            pitch: 0.0,
            yaw: 0.0,
            vn: 0.0,
            ve: 0.0,
            vf: 0.0,
            vl: 0.0,
            vu: 0.0,
            ax: 0.0,
            ay: 0.0,
            az: 0.0,
            af: 0.0,
            al: 0.0,
            au: 0.0,
            wx: 0.0,
            wy: 0.0,
            wz: 0.0,
            wf: 0.0,
            wl: 0.0,
            wu: 0.0,
            pos_accuracy: 0.0,
            vel_accuracy: 0.0,
            navstat: INVALID_STATUS,
            numsats: 0,
            posmode: INVALID_STATUS,
            velmode: INVALID_STATUS,
            orimode: INVALID_STATUS,
        }
    }
}

/// Walks the whitespace-separated tokens of a record in order.
///
/// Once the record runs out of tokens every further read is a no-op, which
/// leaves the remaining fields at their defaults.
struct FieldReader<'a> {
    tokens: SplitWhitespace<'a>,
    exhausted: bool,
}

impl<'a> FieldReader<'a> {
    fn new(line: &'a str) -> Self {
        Self {
            tokens: line.split_whitespace(),
            exhausted: false,
        }
    }

    fn read<T: FromStr>(&mut self, field: &'static str, slot: &mut T) -> Result<(), ImuError> {
        if self.exhausted {
            return Ok(());
        }
        match self.tokens.next() {
            Some(token) => {
                *slot = token.parse().map_err(|_| ImuError::Parse {
                    field,
                    token: token.to_string(),
                })?;
            }
            None => self.exhausted = true,
        }
        Ok(())
    }
}

impl ImuSample {
    /// Parses one OXTS record: lat lon alt, roll pitch yaw, vn ve vf vl vu,
    /// ax ay az af al au, wx wy wz wf wl wu, pos_accuracy vel_accuracy,
    /// navstat numsats posmode velmode orimode.
    ///
    /// A short record fills the leading fields and leaves the rest at their
    /// defaults; a token that is present but not numeric is an error.
    pub fn from_record(line: &str) -> Result<Self, ImuError> {
        let mut s = ImuSample::default();
        let mut r = FieldReader::new(line);

        r.read("lat", &mut s.lat)?;
        r.read("lon", &mut s.lon)?;
        r.read("alt", &mut s.alt)?;

        r.read("roll", &mut s.roll)?;
        r.read("pitch", &mut s.pitch)?;
        r.read("yaw", &mut s.yaw)?;

        r.read("vn", &mut s.vn)?;
        r.read("ve", &mut s.ve)?;
        r.read("vf", &mut s.vf)?;
        r.read("vl", &mut s.vl)?;
        r.read("vu", &mut s.vu)?;

        r.read("ax", &mut s.ax)?;
        r.read("ay", &mut s.ay)?;
        r.read("az", &mut s.az)?;
        r.read("af", &mut s.af)?;
        r.read("al", &mut s.al)?;
        r.read("au", &mut s.au)?;

        r.read("wx", &mut s.wx)?;
        r.read("wy", &mut s.wy)?;
        r.read("wz", &mut s.wz)?;
        r.read("wf", &mut s.wf)?;
        r.read("wl", &mut s.wl)?;
        r.read("wu", &mut s.wu)?;

        r.read("pos_accuracy", &mut s.pos_accuracy)?;
        r.read("vel_accuracy", &mut s.vel_accuracy)?;

        r.read("navstat", &mut s.navstat)?;
        r.read("numsats", &mut s.numsats)?;
        r.read("posmode", &mut s.posmode)?;
        r.read("velmode", &mut s.velmode)?;
        r.read("orimode", &mut s.orimode)?;

        Ok(s)
    }

    /// Reads the first line of an OXTS file. Any further lines are ignored;
    /// an empty file yields [`ImuSample::default`].
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ImuError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| ImuError::Open {
            path: path.to_path_buf(),
            source,
        })?;

        let mut line = String::new();
        BufReader::new(file)
            .read_line(&mut line)
            .map_err(|source| ImuError::Read {
                path: path.to_path_buf(),
                source,
            })?;

        if line.trim().is_empty() {
            return Ok(ImuSample::default());
        }
        Self::from_record(&line)
    }

    pub fn acceleration(&self) -> Vector3<f64> {
        Vector3::new(self.ax, self.ay, self.az)
    }

    pub fn angular_velocity(&self) -> Vector3<f64> {
        Vector3::new(self.wx, self.wy, self.wz)
    }

    /// Roll, pitch and yaw, in that order.
    pub fn rpy(&self) -> Vector3<f64> {
        Vector3::new(self.roll, self.pitch, self.yaw)
    }
}
