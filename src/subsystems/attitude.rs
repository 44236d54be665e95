use super::{AcsMode, BusContext, Subsystem};
use crate::command::{Command, CommandType, DispatchError};
use crate::config::ConfigError;
use crate::targets::Pointing;
use serde::{Deserialize, Serialize};

const J2000_JD: f64 = 2_451_545.0;
const UNIX_EPOCH_JD: f64 = 2_440_587.5;
const SECONDS_PER_DAY: f64 = 86_400.0;

const DEFAULT_SLEW_RATE_DEG_S: f64 = 0.5;
const DEFAULT_SETTLE_TIME_S: f64 = 30.0;

/// Low-precision apparent solar position (RA, Dec in degrees) at a unix time.
///
/// Accurate to about 0.01 degrees between 1950 and 2050, which is plenty for
/// sun-pointing and avoidance angles.
pub fn sun_position(utime: f64) -> (f64, f64) {
    let n = utime / SECONDS_PER_DAY + UNIX_EPOCH_JD - J2000_JD;

    let mean_longitude = (280.460 + 0.985_647_4 * n).rem_euclid(360.0);
    let mean_anomaly = (357.528 + 0.985_600_3 * n).rem_euclid(360.0).to_radians();
    let ecliptic_longitude = (mean_longitude
        + 1.915 * mean_anomaly.sin()
        + 0.020 * (2.0 * mean_anomaly).sin())
    .to_radians();
    let obliquity = (23.439 - 0.000_000_4 * n).to_radians();

    let ra = (obliquity.cos() * ecliptic_longitude.sin())
        .atan2(ecliptic_longitude.cos())
        .to_degrees()
        .rem_euclid(360.0);
    let dec = (obliquity.sin() * ecliptic_longitude.sin()).asin().to_degrees();

    (ra, dec)
}

/// Great-circle angle between two sky positions, degrees.
pub fn angular_separation(ra1: f64, dec1: f64, ra2: f64, dec2: f64) -> f64 {
    let (ra1, dec1, ra2, dec2) = (
        ra1.to_radians(),
        dec1.to_radians(),
        ra2.to_radians(),
        dec2.to_radians(),
    );

    // Haversine form stays accurate for small separations
    let a = ((dec2 - dec1) / 2.0).sin().powi(2)
        + dec1.cos() * dec2.cos() * ((ra2 - ra1) / 2.0).sin().powi(2);
    (2.0 * a.sqrt().min(1.0).asin()).to_degrees()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttitudeConfig {
    pub slew_rate_deg_s: f64,
    pub settle_time_s: f64,
    pub initial_ra: f64,
    pub initial_dec: f64,
}

impl Default for AttitudeConfig {
    fn default() -> Self {
        Self {
            slew_rate_deg_s: DEFAULT_SLEW_RATE_DEG_S,
            settle_time_s: DEFAULT_SETTLE_TIME_S,
            initial_ra: 0.0,
            initial_dec: 0.0,
        }
    }
}

impl AttitudeConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.slew_rate_deg_s.is_finite() || self.slew_rate_deg_s <= 0.0 {
            return Err(ConfigError::InvalidSpacecraft(alloc::format!(
                "slew rate {} must be positive",
                self.slew_rate_deg_s
            )));
        }
        if !self.settle_time_s.is_finite() || self.settle_time_s < 0.0 {
            return Err(ConfigError::InvalidSpacecraft(alloc::format!(
                "settle time {} must not be negative",
                self.settle_time_s
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Slew {
    pub from_ra: f64,
    pub from_dec: f64,
    pub to: Pointing,
    pub start: f64,
    pub end: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttitudeState {
    pub mode: AcsMode,
    pub ra: f64,
    pub dec: f64,
    pub roll: f64,
    pub obsid: Option<u32>,
    pub slew: Option<Slew>,
}

#[derive(Debug)]
pub struct AttitudeControl {
    state: AttitudeState,
    config: AttitudeConfig,
    total_slews: u32,
}

impl AttitudeControl {
    pub fn new(config: AttitudeConfig) -> Self {
        Self {
            state: AttitudeState {
                mode: AcsMode::Science,
                ra: config.initial_ra,
                dec: config.initial_dec,
                roll: 0.0,
                obsid: None,
                slew: None,
            },
            config,
            total_slews: 0,
        }
    }

    pub fn mode(&self) -> AcsMode {
        self.state.mode
    }

    pub fn total_slews(&self) -> u32 {
        self.total_slews
    }

    /// Seconds needed to slew from the current attitude and settle on `pointing`.
    pub fn slew_time(&self, pointing: &Pointing) -> f64 {
        let distance = angular_separation(self.state.ra, self.state.dec, pointing.ra, pointing.dec);
        if distance <= f64::EPSILON {
            return 0.0;
        }
        distance / self.config.slew_rate_deg_s + self.config.settle_time_s
    }

    /// Cosine of the angle between the boresight and the sun, floored at zero.
    pub fn sun_incidence(&self, utime: f64) -> f64 {
        let (sun_ra, sun_dec) = sun_position(utime);
        angular_separation(self.state.ra, self.state.dec, sun_ra, sun_dec)
            .to_radians()
            .cos()
            .max(0.0)
    }

    fn point_at_sun(&mut self, utime: f64) {
        let (ra, dec) = sun_position(utime);
        self.state.ra = ra;
        self.state.dec = dec;
        self.state.roll = 0.0;
        self.state.slew = None;
    }

    /// Sun-pointing override used while in safe mode.
    pub fn hold_safe_mode(&mut self, utime: f64) {
        self.state.mode = AcsMode::SafeMode;
        self.state.obsid = None;
        self.point_at_sun(utime);
    }
}

impl Subsystem for AttitudeControl {
    type State = AttitudeState;

    fn update(&mut self, ctx: &BusContext, _dt_s: f64) {
        match self.state.mode {
            AcsMode::Slewing => {
                if let Some(slew) = self.state.slew {
                    if ctx.utime >= slew.end {
                        self.state.ra = slew.to.ra;
                        self.state.dec = slew.to.dec;
                        self.state.roll = slew.to.roll;
                        self.state.slew = None;
                        self.state.mode = AcsMode::Science;
                    }
                }
            }
            AcsMode::Charging | AcsMode::SafeMode => self.point_at_sun(ctx.utime),
            AcsMode::Science => {}
        }
    }

    fn execute_command(&mut self, command: &Command, utime: f64) -> Result<(), DispatchError> {
        let name = command.command_type.name();

        match command.command_type {
            CommandType::EnterSafeMode => {
                self.hold_safe_mode(utime);
                Ok(())
            }
            _ if self.state.mode == AcsMode::SafeMode => Err(DispatchError {
                command: name,
                reason: "attitude control is in safe mode",
            }),
            CommandType::SlewToTarget { pointing } => {
                let slew_time = self.slew_time(&pointing);
                self.state.slew = Some(Slew {
                    from_ra: self.state.ra,
                    from_dec: self.state.dec,
                    to: pointing,
                    start: utime,
                    end: utime + slew_time,
                });
                self.state.obsid = Some(pointing.obsid);
                self.state.mode = AcsMode::Slewing;
                self.total_slews = self.total_slews.saturating_add(1);

                // A zero-length slew lands immediately
                if slew_time <= 0.0 {
                    self.update(
                        &BusContext {
                            utime,
                            mode: AcsMode::Slewing,
                            sun_incidence: 0.0,
                            power_draw_w: 0.0,
                        },
                        0.0,
                    );
                }
                Ok(())
            }
            CommandType::EndObservation { obsid } => {
                if self.state.obsid == Some(obsid) {
                    self.state.obsid = None;
                }
                Ok(())
            }
            CommandType::StartBatteryCharge => {
                self.state.mode = AcsMode::Charging;
                self.state.obsid = None;
                self.point_at_sun(utime);
                Ok(())
            }
            CommandType::EndBatteryCharge => {
                if self.state.mode != AcsMode::Charging {
                    return Err(DispatchError {
                        command: name,
                        reason: "not charging",
                    });
                }
                self.state.mode = AcsMode::Science;
                Ok(())
            }
        }
    }

    fn get_state(&self) -> Self::State {
        self.state.clone()
    }
}
