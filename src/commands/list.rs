//! List commands implementation

use samflash_core::board::{BoardConfig, BoardDatabase};
use samflash_serial::SystemPorts;

/// List all known boards
pub fn list_boards(db: &BoardDatabase, vendor_filter: Option<&str>) {
    println!("Supported boards:");
    println!();
    println!(
        "{:<10} {:<18} {:<12} {:<10} {:>8}",
        "Vendor", "Board", "MCU", "Protocol", "Speed"
    );
    println!("{}", "-".repeat(62));

    let mut boards: Vec<&BoardConfig> = match vendor_filter {
        Some(vendor) => db.find_by_vendor(vendor),
        None => db.iter().collect(),
    };
    boards.sort_by(|a, b| (&a.vendor, &a.id).cmp(&(&b.vendor, &b.id)));

    for board in boards {
        let protocol = if board.upload_protocol.is_empty() {
            "none"
        } else {
            board.upload_protocol.as_str()
        };
        let speed = board
            .upload_speed
            .map(|s| s.to_string())
            .unwrap_or_else(|| "-".into());
        println!(
            "{:<10} {:<18} {:<12} {:<10} {:>8}",
            board.vendor, board.id, board.mcu, protocol, speed
        );
    }
}

/// List serial ports visible to the host
pub fn list_ports() -> Result<(), Box<dyn std::error::Error>> {
    let ports = SystemPorts::new().describe()?;
    if ports.is_empty() {
        println!("No serial ports found");
        return Ok(());
    }

    println!("Serial ports:");
    println!();
    for port in ports {
        println!("  {:<24} {}", port.name, port.details);
    }
    Ok(())
}
