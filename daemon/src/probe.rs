/// Host capabilities read by the status monitor on every tick.
///
/// Both reads are synchronous and independently fallible. A failed read makes
/// the tick inconclusive; it never means "offline" or "no game".
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;

use sysinfo::{ProcessesToUpdate, System};
use tokio::sync::RwLock;

use crate::config::Config;
use crate::error::SensorError;
use crate::ledger::GameId;

pub trait NetworkProbe: Send {
    fn is_online(&mut self) -> Result<bool, SensorError>;
}

pub trait GameDetector: Send {
    fn current_game(&mut self) -> Result<Option<GameId>, SensorError>;
}

/// Reachability check: the device is online when a TCP connection to the
/// configured host can be opened within the timeout.
///
/// Name resolution failures count as offline since that is how they show up
/// on a disconnected device.
pub struct TcpProbe {
    config: Arc<RwLock<Config>>,
}

impl TcpProbe {
    pub fn new(config: Arc<RwLock<Config>>) -> Self {
        Self { config }
    }
}

impl NetworkProbe for TcpProbe {
    fn is_online(&mut self) -> Result<bool, SensorError> {
        let (host, port, timeout) = {
            let config = self.config.try_read().map_err(|_| SensorError::ConfigBusy)?;
            let net = &config.network;
            if net.probe_host.trim().is_empty() {
                return Err(SensorError::Network("probe host is empty".to_string()));
            }
            (net.probe_host.clone(), net.probe_port, net.probe_timeout())
        };

        let addrs = match (host.as_str(), port).to_socket_addrs() {
            Ok(addrs) => addrs,
            Err(e) => {
                tracing::debug!(host = %host, error = %e, "Probe host did not resolve");
                return Ok(false);
            }
        };

        for addr in addrs {
            if TcpStream::connect_timeout(&addr, timeout).is_ok() {
                return Ok(true);
            }
        }
        tracing::debug!(host = %host, port, "Probe connection failed");
        Ok(false)
    }
}

/// Foreground game detection by scanning the OS process list for the
/// executables listed under `[[games]]`.
///
/// Only one game is considered active at a time. If several configured
/// executables are running, the first match in the config list wins.
pub struct ProcessGameDetector {
    sys: System,
    config: Arc<RwLock<Config>>,
}

impl ProcessGameDetector {
    pub fn new(config: Arc<RwLock<Config>>) -> Self {
        Self {
            sys: System::new(),
            config,
        }
    }
}

impl GameDetector for ProcessGameDetector {
    fn current_game(&mut self) -> Result<Option<GameId>, SensorError> {
        let config = self.config.try_read().map_err(|_| SensorError::ConfigBusy)?;
        if config.games.is_empty() {
            return Ok(None);
        }

        self.sys.refresh_processes(ProcessesToUpdate::All, true);
        if self.sys.processes().is_empty() {
            return Err(SensorError::Detector("process list is empty".to_string()));
        }

        let found = config.games.iter().find(|game| {
            let target = game.executable_name.to_lowercase();
            self.sys
                .processes()
                .values()
                .any(|p| p.name().to_string_lossy().to_lowercase() == target)
        });
        Ok(found.map(|game| GameId::new(game.game_id.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GameConfig;
    use std::net::TcpListener;

    fn shared(config: Config) -> Arc<RwLock<Config>> {
        Arc::new(RwLock::new(config))
    }

    // ── TcpProbe ──────────────────────────────────────────────────────────────

    #[test]
    fn tcp_probe_online_when_listener_accepts() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut config = Config::default();
        config.network.probe_host = "127.0.0.1".to_string();
        config.network.probe_port = listener.local_addr().unwrap().port();

        let mut probe = TcpProbe::new(shared(config));
        assert!(probe.is_online().unwrap());
    }

    #[test]
    fn tcp_probe_offline_when_connection_refused() {
        // Bind then drop to get a port that is very likely closed.
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let mut config = Config::default();
        config.network.probe_host = "127.0.0.1".to_string();
        config.network.probe_port = port;

        let mut probe = TcpProbe::new(shared(config));
        assert!(!probe.is_online().unwrap());
    }

    #[test]
    fn tcp_probe_empty_host_is_inconclusive() {
        let mut config = Config::default();
        config.network.probe_host = "  ".to_string();
        let mut probe = TcpProbe::new(shared(config));
        assert!(probe.is_online().is_err());
    }

    #[test]
    fn tcp_probe_busy_config_is_inconclusive() {
        let config = shared(Config::default());
        let _guard = config.try_write().unwrap();
        let mut probe = TcpProbe::new(Arc::clone(&config));
        assert!(matches!(probe.is_online(), Err(SensorError::ConfigBusy)));
    }

    // ── ProcessGameDetector ───────────────────────────────────────────────────

    #[test]
    fn detector_without_games_reports_none() {
        let mut detector = ProcessGameDetector::new(shared(Config::default()));
        assert_eq!(detector.current_game().unwrap(), None);
    }

    #[test]
    fn detector_ignores_unmatched_executables() {
        let mut config = Config::default();
        config.games.push(GameConfig {
            game_id: "42".to_string(),
            executable_name: "definitely-not-running-offtime.exe".to_string(),
        });
        let mut detector = ProcessGameDetector::new(shared(config));
        assert_eq!(detector.current_game().unwrap(), None);
    }

    #[test]
    fn detector_busy_config_is_inconclusive() {
        let config = shared(Config::default());
        let _guard = config.try_write().unwrap();
        let mut detector = ProcessGameDetector::new(Arc::clone(&config));
        assert!(matches!(detector.current_game(), Err(SensorError::ConfigBusy)));
    }
}
