use std::path::PathBuf;

/// Command line options.
#[derive(Debug, Default, PartialEq)]
pub struct Args {
    pub verbose: bool,
    pub library: Option<PathBuf>,
    pub patch_dir: Option<PathBuf>,
    pub device: Option<String>,
    pub midi_out: Option<usize>,
    pub list_devices: bool,
    pub list_midi: bool,
    pub patches: Vec<String>,
}

pub const USAGE: &str = "usage: pdhost [options] <patch>...

options:
  -v, --verbose         debug logging
  --lib <path>          libpd shared library
  --patch-dir <dir>     directory patches are opened from
  --device <name>       output device
  --midi-out <index>    forward patch MIDI output to this port
  --list-devices        list output devices and exit
  --list-midi           list MIDI output ports and exit";

impl Args {
    pub fn parse<I: IntoIterator<Item = String>>(args: I) -> Result<Self, String> {
        let mut out = Args::default();
        let mut iter = args.into_iter();
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "-v" | "--verbose" => out.verbose = true,
                "--list-devices" => out.list_devices = true,
                "--list-midi" => out.list_midi = true,
                "--lib" => out.library = Some(value(&mut iter, &arg)?.into()),
                "--patch-dir" => out.patch_dir = Some(value(&mut iter, &arg)?.into()),
                "--device" => out.device = Some(value(&mut iter, &arg)?),
                "--midi-out" => {
                    let raw = value(&mut iter, &arg)?;
                    let index = raw
                        .parse()
                        .map_err(|_| format!("--midi-out expects a port index, got '{}'", raw))?;
                    out.midi_out = Some(index);
                }
                flag if flag.starts_with('-') => return Err(format!("unknown option {}", flag)),
                _ => out.patches.push(arg),
            }
        }
        Ok(out)
    }

    /// True when the invocation only lists things.
    pub fn is_listing(&self) -> bool {
        self.list_devices || self.list_midi
    }
}

fn value(iter: &mut impl Iterator<Item = String>, flag: &str) -> Result<String, String> {
    iter.next().ok_or_else(|| format!("{} needs a value", flag))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Args, String> {
        Args::parse(args.iter().map(|s| s.to_string()))
    }

    #[test]
    fn patches_and_flags() {
        let args = parse(&["-v", "synth", "--lib", "/opt/libpd.so", "drums", "--midi-out", "2"]).unwrap();
        assert!(args.verbose);
        assert_eq!(args.patches, vec!["synth", "drums"]);
        assert_eq!(args.library, Some(PathBuf::from("/opt/libpd.so")));
        assert_eq!(args.midi_out, Some(2));
        assert!(!args.is_listing());
    }

    #[test]
    fn missing_value_is_an_error() {
        assert!(parse(&["--patch-dir"]).is_err());
        assert!(parse(&["--midi-out", "two"]).is_err());
    }

    #[test]
    fn unknown_flag_is_an_error() {
        assert_eq!(parse(&["--bogus"]), Err("unknown option --bogus".to_string()));
    }

    #[test]
    fn listing_needs_no_patches() {
        let args = parse(&["--list-devices"]).unwrap();
        assert!(args.is_listing());
        assert!(args.patches.is_empty());
    }
}
