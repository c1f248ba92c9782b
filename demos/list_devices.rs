use mpsse_capture::enumerate;

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let devices = enumerate()?;
    if devices.is_empty() {
        println!("No FTDI devices found");
    }
    for device in &devices {
        let clock = match device.chip_type.reference_clock_hz() {
            Some(hz) => format!("{}MHz MPSSE", hz / 1_000_000),
            None => "no MPSSE capture support".to_string(),
        };
        println!(
            "{}: {} [{:?}] serial '{}' ({clock})",
            device.index, device.description, device.chip_type, device.serial
        );
    }
    Ok(())
}
