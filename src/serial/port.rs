//! Serial port opening and discovery

use crate::config::SessionConfig;
use crate::error::{SessionError, SessionResult};
use colored::Colorize;
use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};

/// Open the device described by `config` as 8N1 with no flow control.
///
/// Stale bytes sitting in the driver buffers are discarded before returning.
pub fn open_port(config: &SessionConfig) -> SessionResult<Box<dyn SerialPort>> {
    let connection_err = |source| SessionError::Connection {
        path: config.device_path.clone(),
        source,
    };

    let port = serialport::new(&config.device_path, config.baud_rate)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .flow_control(FlowControl::None)
        .timeout(config.read_timeout)
        .open()
        .map_err(connection_err)?;

    port.clear(ClearBuffer::All).map_err(connection_err)?;

    Ok(port)
}

/// Information about a detected serial port
#[derive(Debug, Clone)]
pub struct PortInfo {
    pub path: String,
    pub port_type: PortType,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub serial_number: Option<String>,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PortType {
    UsbSerial,
    PciSerial,
    Bluetooth,
    Unknown,
}

impl std::fmt::Display for PortType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PortType::UsbSerial => write!(f, "USB Serial"),
            PortType::PciSerial => write!(f, "PCI Serial"),
            PortType::Bluetooth => write!(f, "Bluetooth"),
            PortType::Unknown => write!(f, "Unknown"),
        }
    }
}

impl From<serialport::SerialPortInfo> for PortInfo {
    fn from(p: serialport::SerialPortInfo) -> Self {
        let mut info = PortInfo {
            path: p.port_name,
            port_type: PortType::Unknown,
            manufacturer: None,
            product: None,
            serial_number: None,
            vid: None,
            pid: None,
        };

        match p.port_type {
            serialport::SerialPortType::UsbPort(usb) => {
                info.port_type = PortType::UsbSerial;
                info.manufacturer = usb.manufacturer;
                info.product = usb.product;
                info.serial_number = usb.serial_number;
                info.vid = Some(usb.vid);
                info.pid = Some(usb.pid);
            }
            serialport::SerialPortType::PciPort => info.port_type = PortType::PciSerial,
            serialport::SerialPortType::BluetoothPort => info.port_type = PortType::Bluetooth,
            serialport::SerialPortType::Unknown => {}
        }

        info
    }
}

/// List all available serial ports
pub fn list_ports() -> serialport::Result<Vec<PortInfo>> {
    Ok(serialport::available_ports()?
        .into_iter()
        .map(PortInfo::from)
        .collect())
}

/// Print formatted list of available serial ports
pub fn print_ports(ports: &[PortInfo]) {
    if ports.is_empty() {
        println!("{}", "No serial ports found".yellow());
        println!("\n{}", "Troubleshooting tips:".cyan().bold());
        println!("  1. Check the controller's USB cable and power");
        println!("  2. Check if the device is recognized: ls -la /dev/ttyUSB* /dev/ttyACM*");
        println!("  3. Add your user to the 'dialout' group: sudo usermod -aG dialout $USER");
        return;
    }

    println!("{}", "Available Serial Ports:".green().bold());
    println!("{}", "=".repeat(60));

    for port in ports {
        println!("\n{}: {}", "Port".cyan(), port.path.white().bold());
        println!("  Type: {}", port.port_type);

        if let Some(ref mfg) = port.manufacturer {
            println!("  Manufacturer: {}", mfg);
        }
        if let Some(ref prod) = port.product {
            println!("  Product: {}", prod);
        }
        if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
            println!("  VID:PID: {:04x}:{:04x}", vid, pid);
        }
    }

    println!("\n{}", "=".repeat(60));
    println!("{}", "Use: gcode-sender --port <PORT>".yellow());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_missing_device_is_connection_error() {
        let config = SessionConfig {
            device_path: "/dev/this-port-does-not-exist".to_string(),
            ..Default::default()
        };

        match open_port(&config) {
            Err(SessionError::Connection { path, .. }) => {
                assert_eq!(path, "/dev/this-port-does-not-exist")
            }
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("opened a nonexistent port"),
        }
    }

    #[test]
    fn test_usb_port_info_conversion() {
        let raw = serialport::SerialPortInfo {
            port_name: "/dev/ttyACM0".to_string(),
            port_type: serialport::SerialPortType::UsbPort(serialport::UsbPortInfo {
                vid: 0x2341,
                pid: 0x0042,
                serial_number: Some("A1".to_string()),
                manufacturer: Some("Arduino".to_string()),
                product: None,
            }),
        };

        let info = PortInfo::from(raw);
        assert_eq!(info.port_type, PortType::UsbSerial);
        assert_eq!(info.vid, Some(0x2341));
        assert_eq!(info.manufacturer.as_deref(), Some("Arduino"));
    }
}
