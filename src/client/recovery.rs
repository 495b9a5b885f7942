//! Bringing the clock into a known state.
//!
//! [`ClockClient::configure()`] repeatedly tries to select mode 25 and maps
//! each way that can fail onto a recovery step:
//!
//! | Mode select result       | Step                    | Bound                          |
//! |--------------------------|-------------------------|--------------------------------|
//! | `NegativeAck`, `NoAck`   | request central control | `RetryLimits::central_control` |
//! | `BusTimeout`             | reset the bus           | `RetryLimits::resets`          |
//! | `Collision`, `LinesBusy` | retry immediately       | `RetryLimits::contention`      |
//! | `Silent`                 | wake the clock          | `RetryLimits::wakes`           |
//!
//! Each step returns to another mode select attempt.  Exceeding a bound, or
//! any other error, ends in [`ConfigureState::Failed`].  The counters are
//! independent and start from zero on every call, so `configure()` can be
//! called again, e.g. after the clock was reconnected.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use std::thread;

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::bus::Transport;
use crate::client::ClockClient;
use crate::{Error, Result};

/// Recovery states.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConfigureState {
    /// Attempting mode select
    #[default]
    TryMode,
    /// Requesting central control
    SendingCC,
    /// Resetting the bus
    Resetting,
    /// Waking the clock
    Waking,
    /// Clock is in mode 25 under central control
    Ready,
    /// A bound was exceeded, or an unrecoverable error occurred
    Failed,
}

/// What a recovery run did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Final state, [`ConfigureState::Ready`] or [`ConfigureState::Failed`]
    pub state: ConfigureState,
    /// Error that caused [`ConfigureState::Failed`]
    pub error: Option<Error>,
    pub resets: u32,
    pub central_control: u32,
    pub wakes: u32,
    pub contention: u32,
}

impl<T: Transport> ClockClient<T> {
    /// Wake the clock if needed, take central control and select mode 25.
    ///
    /// Returns the recovery report on success, or the error that ended the
    /// attempt.  Use [`ClockClient::recover()`] for the report on failure.
    pub fn configure(&mut self) -> Result<RecoveryReport> {
        let report = self.recover();
        match report.state {
            ConfigureState::Ready => Ok(report),
            _ => Err(report.error.unwrap_or(Error::NoAck)),
        }
    }

    /// Run the recovery state machine to completion.
    pub fn recover(&mut self) -> RecoveryReport {
        let limits = self.config.retries.clone();
        let mut report = RecoveryReport::default();
        let mut state = ConfigureState::TryMode;

        loop {
            trace!("Configure state {state:?}");
            state = match state {
                ConfigureState::TryMode => match self.mode_select() {
                    Ok(()) => ConfigureState::Ready,
                    Err(e) => {
                        let (count, limit, next) = match e {
                            Error::NegativeAck | Error::NoAck => (
                                &mut report.central_control,
                                limits.central_control,
                                ConfigureState::SendingCC,
                            ),
                            Error::BusTimeout => {
                                (&mut report.resets, limits.resets, ConfigureState::Resetting)
                            }
                            Error::Collision | Error::LinesBusy => (
                                &mut report.contention,
                                limits.contention,
                                ConfigureState::TryMode,
                            ),
                            Error::Silent => {
                                (&mut report.wakes, limits.wakes, ConfigureState::Waking)
                            }
                            e => {
                                error!("Configure failed: {e}");
                                report.error = Some(e);
                                report.state = ConfigureState::Failed;
                                return report;
                            }
                        };
                        *count += 1;
                        if *count > limit {
                            error!("Configure failed: {e}, {next:?} limit of {limit} exceeded");
                            report.error = Some(e);
                            ConfigureState::Failed
                        } else {
                            debug!("Mode select failed: {e}, next {next:?}");
                            next
                        }
                    }
                },

                ConfigureState::SendingCC => {
                    thread::sleep(self.config.acks.central_control_pause);
                    if let Err(e) = self.central_control() {
                        debug!("Central control not granted: {e}");
                    }
                    ConfigureState::TryMode
                }

                ConfigureState::Resetting => match self.transport.reset_bus() {
                    Ok(()) => ConfigureState::TryMode,
                    Err(e) => {
                        error!("Bus reset failed: {e}");
                        report.error = Some(e);
                        ConfigureState::Failed
                    }
                },

                ConfigureState::Waking => {
                    if let Err(e) = self.wake() {
                        debug!("Wake failed: {e}");
                    }
                    ConfigureState::TryMode
                }

                ConfigureState::Ready | ConfigureState::Failed => break,
            };
        }

        report.state = state;
        if state == ConfigureState::Ready {
            info!(
                "Clock configured ({} wakes, {} central control, {} resets)",
                report.wakes, report.central_control, report.resets
            );
        }
        report
    }
}
