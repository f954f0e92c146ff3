use std::ffi::OsString;
use std::path::PathBuf;

use clap::Parser;

use crate::activation::{ActivationUpdate, MaxActivation};
use crate::catalog;
use crate::error::{DevControlError, Result};
use crate::workflow::ControlRequest;

/// Single-dash long options of the historical command line
const LEGACY_FLAGS: &[&str] = &["-lm", "-mu", "-nz", "-ur", "-maxr"];

/// zbc_dev_control - Mutate a zoned device and manage its Zone Domains settings
#[derive(Parser, Debug)]
#[command(name = "zbc_dev_control")]
#[command(about = "Mutate a zoned device and manage its persistent Zone Domains settings")]
#[command(version)]
#[command(after_help = catalog::targets_help())]
pub struct Cli {
    /// Verbose mode
    #[arg(short = 'v')]
    pub verbose: bool,

    /// List mutations supported by the device
    #[arg(long = "lm")]
    pub list_mutations: bool,

    /// Mutate to the specified target, or to the numeric type and model
    #[arg(long = "mu", num_args = 1..=2, value_names = ["TARGET|TYPE", "MODEL"])]
    pub mutate: Option<Vec<String>>,

    /// Set the default number of zones to activate
    #[arg(long = "nz", value_name = "NUM", value_parser = clap::value_parser!(u32).range(1..))]
    pub nr_zones: Option<u32>,

    /// Enable or disable unrestricted reads
    #[arg(long = "ur", value_name = "y|n", value_parser = parse_yes_no)]
    pub unrestricted_read: Option<bool>,

    /// Set the maximum number of realms to activate
    #[arg(long = "maxr", value_name = "NUM|unlimited", value_parser = parse_max_activation)]
    pub max_activate: Option<MaxActivation>,

    /// Device to operate on
    #[arg(value_name = "DEV")]
    pub device: Option<PathBuf>,
}

impl Cli {
    /// Parse the process arguments, accepting the single-dash long options
    pub fn try_parse_args() -> std::result::Result<Self, clap::Error> {
        Self::try_parse_from(normalize_legacy_args(std::env::args_os()))
    }

    /// Turn the parsed flags into a workflow request.
    ///
    /// `-mu` takes a second value only in its numeric form. Clap cannot know
    /// that, so `-mu NAME <dev>` arrives as two `-mu` values and no device;
    /// the second value is moved back to the device position here.
    ///
    /// # Errors
    ///
    /// - `Usage` for a missing or duplicated device path and malformed `-mu` numbers
    /// - `UnknownMutationTarget` for an unrecognized target name
    pub fn into_request(self) -> Result<ControlRequest> {
        let mut device = self.device;
        let mutation = match self.mutate.as_deref() {
            None => None,
            Some([first, rest @ ..]) if first.starts_with(|c: char| c.is_ascii_digit()) => {
                let [model] = rest else {
                    return Err(DevControlError::usage(
                        "-mu <type> <model> requires a numeric type and model",
                    ));
                };
                let target_id = parse_c_integer(first)?;
                let option_code = parse_c_integer(model)?;
                Some(catalog::resolve_numeric(target_id, option_code))
            }
            Some([name, rest @ ..]) => {
                let mutation = catalog::resolve_by_name(name)?;
                if let [extra] = rest {
                    if device.is_some() {
                        return Err(DevControlError::usage(format!(
                            "unexpected argument \"{}\"",
                            extra
                        )));
                    }
                    device = Some(PathBuf::from(extra));
                }
                Some(mutation)
            }
            Some([]) => return Err(DevControlError::usage("-mu requires a target")),
        };

        let path = device.ok_or_else(|| DevControlError::usage("missing device path"))?;

        let request = ControlRequest {
            path,
            list_mutations: self.list_mutations,
            mutation,
            activation: ActivationUpdate {
                nr_zones: self.nr_zones,
                unrestricted_read: self.unrestricted_read,
                max_activate: self.max_activate,
            },
        };
        request.validate()?;
        Ok(request)
    }
}

/// Rewrite `-lm`, `-mu`, `-nz`, `-ur` and `-maxr` into their `--` forms.
pub fn normalize_legacy_args<I, T>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString>,
{
    args.into_iter()
        .map(|arg| {
            let arg = arg.into();
            match arg.to_str() {
                Some(s) if LEGACY_FLAGS.contains(&s) => OsString::from(format!("-{}", s)),
                _ => arg,
            }
        })
        .collect()
}

fn parse_yes_no(s: &str) -> std::result::Result<bool, String> {
    match s {
        "y" => Ok(true),
        "n" => Ok(false),
        _ => Err("-ur value must be y or n".to_string()),
    }
}

fn parse_max_activation(s: &str) -> std::result::Result<MaxActivation, String> {
    if s == "unlimited" {
        return Ok(MaxActivation::Unlimited);
    }
    let value: u16 = s.parse().map_err(|_| "invalid -maxr value".to_string())?;
    MaxActivation::limited(value).map_err(|e| e.to_string())
}

/// Parse an unsigned integer with C prefix rules: `0x` hex, leading `0` octal.
fn parse_c_integer(s: &str) -> Result<u32> {
    let parsed = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16)
    } else if s.len() > 1 && s.starts_with('0') {
        u32::from_str_radix(&s[1..], 8)
    } else {
        s.parse()
    };
    parsed.map_err(|_| DevControlError::usage(format!("invalid numeric value \"{}\"", s)))
}
