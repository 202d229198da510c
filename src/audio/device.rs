use crate::audio::AudioError;
use cpal::traits::{DeviceTrait, HostTrait};

/// Print every input and output device the host exposes, marking defaults.
pub fn list_devices() -> Result<(), AudioError> {
    let host = cpal::default_host();

    let default_input = host
        .default_input_device()
        .and_then(|device| device.name().ok());
    let default_output = host
        .default_output_device()
        .and_then(|device| device.name().ok());

    println!("Input devices:");
    for device in host.input_devices()? {
        let name = device.name()?;
        let marker = if Some(&name) == default_input.as_ref() {
            " (default)"
        } else {
            ""
        };
        println!("  {}{}", name, marker);
    }

    println!("Output devices:");
    for device in host.output_devices()? {
        let name = device.name()?;
        let marker = if Some(&name) == default_output.as_ref() {
            " (default)"
        } else {
            ""
        };
        println!("  {}{}", name, marker);
    }

    Ok(())
}
