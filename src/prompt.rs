// Interactive physical device selection
//
// Reads a device index from the user when more than one compute-capable
// device is present. Generic over reader/writers so it can be driven from
// tests.

use anyhow::{Context, Result};
use std::io::{BufRead, Write};

/// Pick a physical device index.
///
/// `selectable[i]` says whether device `i` (enumeration order) has a compute
/// queue. A `preset` index (from config) bypasses the prompt but is still
/// checked. With a single selectable device no input is read. The prompt
/// goes to `output`; diagnostics for rejected answers go to `errors`.
pub fn choose_physical_device_index<R: BufRead, W: Write, E: Write>(
    selectable: &[bool],
    preset: Option<usize>,
    input: &mut R,
    output: &mut W,
    errors: &mut E,
) -> Result<usize> {
    let count = selectable.len();
    let mut usable = (0..count).filter(|&i| selectable[i]);
    let first_usable = match usable.next() {
        Some(index) => index,
        None => anyhow::bail!("No compute-capable Vulkan device found"),
    };
    let single = usable.next().is_none();

    if let Some(index) = preset {
        if index >= count {
            anyhow::bail!(
                "Configured device index {} is out of range (0..{})",
                index,
                count
            );
        }
        if !selectable[index] {
            anyhow::bail!("Configured device {} has no compute queue", index);
        }
        log::info!("Using configured device index {}", index);
        return Ok(index);
    }

    if single {
        writeln!(output, "Automatically choosing the only available device.")?;
        return Ok(first_usable);
    }

    let mut line = String::new();
    loop {
        write!(output, "Chosen physical device index: ")?;
        output.flush()?;

        line.clear();
        let read = input
            .read_line(&mut line)
            .context("Failed to read device index")?;
        if read == 0 {
            anyhow::bail!("Input closed before a device was chosen");
        }

        match line.trim().parse::<i64>() {
            Err(_) => writeln!(errors, "Invalid input.")?,
            Ok(index) if index < 0 || index as usize >= count => {
                writeln!(errors, "Index out of range.")?
            }
            Ok(index) if !selectable[index as usize] => {
                writeln!(errors, "Device {} has no compute queue.", index)?
            }
            Ok(index) => return Ok(index as usize),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    struct Outcome {
        result: Result<usize>,
        out: String,
        err: String,
    }

    fn run(selectable: &[bool], preset: Option<usize>, input: &str) -> Outcome {
        let mut reader = Cursor::new(input.as_bytes().to_vec());
        let mut out = Vec::new();
        let mut err = Vec::new();
        let result =
            choose_physical_device_index(selectable, preset, &mut reader, &mut out, &mut err);
        Outcome {
            result,
            out: String::from_utf8(out).unwrap(),
            err: String::from_utf8(err).unwrap(),
        }
    }

    #[test]
    fn single_device_is_chosen_without_input() {
        let outcome = run(&[true], None, "");
        assert_eq!(outcome.result.unwrap(), 0);
        assert!(outcome.out.contains("Automatically choosing"));
    }

    #[test]
    fn single_compute_device_among_others_is_chosen() {
        let outcome = run(&[false, true, false], None, "");
        assert_eq!(outcome.result.unwrap(), 1);
        assert!(outcome.out.contains("Automatically choosing"));
    }

    #[test]
    fn no_compute_devices_is_an_error() {
        assert!(run(&[], None, "0\n").result.is_err());
        assert!(run(&[false, false], None, "0\n").result.is_err());
    }

    #[test]
    fn reads_valid_index() {
        let outcome = run(&[true, true, true], None, "2\n");
        assert_eq!(outcome.result.unwrap(), 2);
        assert_eq!(outcome.out, "Chosen physical device index: ");
        assert!(outcome.err.is_empty());
    }

    #[test]
    fn retries_after_bad_input() {
        let outcome = run(&[true, true], None, "gpu\n-1\n7\n 1 \n");
        assert_eq!(outcome.result.unwrap(), 1);
        assert_eq!(outcome.out.matches("Chosen physical device index: ").count(), 4);
        assert_eq!(outcome.err.matches("Invalid input.").count(), 1);
        assert_eq!(outcome.err.matches("Index out of range.").count(), 2);
    }

    #[test]
    fn diagnostics_stay_off_the_prompt_stream() {
        let outcome = run(&[true, true], None, "nope\n0\n");
        assert_eq!(outcome.result.unwrap(), 0);
        assert!(!outcome.out.contains("Invalid input."));
        assert_eq!(outcome.err, "Invalid input.\n");
    }

    #[test]
    fn device_without_compute_is_refused() {
        let outcome = run(&[true, false, true], None, "1\n2\n");
        assert_eq!(outcome.result.unwrap(), 2);
        assert_eq!(outcome.err, "Device 1 has no compute queue.\n");
    }

    #[test]
    fn end_of_input_is_an_error() {
        assert!(run(&[true, true], None, "x\n").result.is_err());
    }

    #[test]
    fn preset_skips_prompt() {
        let outcome = run(&[true, true, true, true], Some(3), "");
        assert_eq!(outcome.result.unwrap(), 3);
        assert!(outcome.out.is_empty());
    }

    #[test]
    fn preset_out_of_range_is_an_error() {
        assert!(run(&[true, true], Some(2), "0\n").result.is_err());
    }

    #[test]
    fn preset_without_compute_is_an_error() {
        assert!(run(&[true, false], Some(1), "0\n").result.is_err());
    }
}
