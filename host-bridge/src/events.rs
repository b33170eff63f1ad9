//! Control frame handler for the host harness.
//!
//! There is no real UART or indicator LED on a desktop, so requested changes
//! are logged and remembered.

use log::{debug, info};
use serial_link::{ConfigSettings, DeviceConn, HwLineState, LinkEvents, Role};

pub struct HostEvents {
    role: Role,
    /// Settings of the local serial endpoint
    local: ConfigSettings,
    /// Last settings mirrored by the peer
    pub remote: Option<ConfigSettings>,
    pub line: HwLineState,
    /// Hardware flow control currently in force
    pub hw_flow: bool,
    /// Last pattern shown on the indicator
    pub indication: Option<DeviceConn>,
}

impl HostEvents {
    pub fn new(role: Role, local: ConfigSettings) -> Self {
        Self {
            role,
            local,
            remote: None,
            line: HwLineState::default(),
            hw_flow: local.hw_flow_enabled(),
            indication: None,
        }
    }
}

impl LinkEvents for HostEvents {
    fn apply_config(&mut self, settings: ConfigSettings) {
        info!(
            "peer serial config: {} bps, {} data bits, parity {}, stop {}, hw flow {}",
            settings.bitrate,
            settings.data_bits,
            settings.parity,
            settings.stop_bits,
            if settings.hw_flow_enabled() { "on" } else { "off" }
        );
        self.remote = Some(settings);

        let hw_flow = settings.hw_flow_enabled();
        if hw_flow != self.hw_flow {
            self.hw_flow = hw_flow;
            self.indicate_connection(if hw_flow {
                DeviceConn::HW_FLOW_ENABLED
            } else {
                DeviceConn::HW_FLOW_DISABLED
            });
        }
    }

    /// RTS is driven by the UART itself while flow control is on
    fn set_line_state(&mut self, line: HwLineState) {
        info!("line state: dtr={} rts={}", line.dtr, line.rts);
        self.line.dtr = line.dtr;
        if self.hw_flow {
            debug!("rts ignored under hw flow control");
        } else {
            self.line.rts = line.rts;
        }
    }

    fn indicate_connection(&mut self, pattern: DeviceConn) {
        if pattern.is_visible() {
            info!(
                "connection indication: {} x ({} ms on, {} ms off)",
                pattern.on_count, pattern.on_period_ms, pattern.off_period_ms
            );
        } else {
            info!("connection indication off");
        }
        self.indication = Some(pattern);
    }

    /// Only the USB side owns the serial configuration
    fn config_requested(&mut self) -> Option<ConfigSettings> {
        match self.role {
            Role::UsbHost => Some(self.local),
            Role::UartBridge => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usb_side_echoes_config() {
        let local = ConfigSettings {
            bitrate: 57_600,
            ..Default::default()
        };
        assert_eq!(HostEvents::new(Role::UsbHost, local).config_requested(), Some(local));
        assert_eq!(HostEvents::new(Role::UartBridge, local).config_requested(), None);
    }

    #[test]
    fn test_remote_state_recorded() {
        let mut events = HostEvents::new(Role::UartBridge, ConfigSettings::default());
        let remote = ConfigSettings {
            bitrate: 921_600,
            hw_flow_status: 1,
            ..Default::default()
        };
        events.apply_config(remote);
        events.set_line_state(HwLineState::new(true, false));

        assert_eq!(events.remote, Some(remote));
        assert_eq!(events.line, HwLineState::new(true, false));
    }

    #[test]
    fn test_flow_change_indicated_once() {
        let mut events = HostEvents::new(Role::UartBridge, ConfigSettings::default());
        assert!(!events.hw_flow);

        let flow_on = ConfigSettings {
            hw_flow_status: 1,
            ..Default::default()
        };
        events.apply_config(flow_on);
        assert!(events.hw_flow);
        assert_eq!(events.indication, Some(DeviceConn::HW_FLOW_ENABLED));

        // same flow setting, only the bitrate moves
        events.indication = None;
        events.apply_config(ConfigSettings {
            bitrate: 57_600,
            ..flow_on
        });
        assert_eq!(events.indication, None);

        events.apply_config(ConfigSettings::default());
        assert!(!events.hw_flow);
        assert_eq!(events.indication, Some(DeviceConn::HW_FLOW_DISABLED));
    }

    #[test]
    fn test_rts_held_while_flow_enabled() {
        let local = ConfigSettings {
            hw_flow_status: 1,
            ..Default::default()
        };
        let mut events = HostEvents::new(Role::UsbHost, local);

        events.set_line_state(HwLineState::new(true, true));
        assert_eq!(events.line, HwLineState::new(true, false));

        events.apply_config(ConfigSettings::default());
        events.set_line_state(HwLineState::new(false, true));
        assert_eq!(events.line, HwLineState::new(false, true));
    }
}
