//! Parsing of the scheduler's plugin option strings into typed options.
//!
//! The host scheduler hands plugin options over as environment-style
//! `NAME=ARGS` pairs with a fixed per-plugin prefix. Valueless flags arrive
//! with the literal argument `(null)`; that sentinel is resolved here so the
//! core layers only ever see typed values.

use std::path::PathBuf;
use std::str::FromStr;

use hwgrid::expand::{AoutMode, Selector};
use hwgrid::ids::{BoardId, ChipId, ModuleId, ReticleId};

use crate::error::SubmitError;

pub const RESOURCE_PREFIX: &str = "_SLURM_SPANK_OPTION_wafer_res_opts_";
pub const ARBITER_PREFIX: &str = "_SLURM_SPANK_OPTION_board_arbiter_";

const FLAG_SENTINEL: &str = "(null)";

#[derive(Debug, Clone, Eq, PartialEq)]
enum OptionValue {
    Flag,
    Value(String),
}

impl OptionValue {
    fn new(args: &str) -> Self {
        if args == FLAG_SENTINEL {
            OptionValue::Flag
        } else {
            OptionValue::Value(args.to_string())
        }
    }

    fn require_value(&self, name: &str) -> crate::Result<&str> {
        match self {
            OptionValue::Value(value) => Ok(value),
            OptionValue::Flag => Err(SubmitError::Validation(format!(
                "Option {name} requires a value"
            ))),
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum ChipInit {
    #[default]
    Default,
    Skip,
    Force,
}

#[derive(Debug, Clone, Default)]
pub struct ResourceOptions {
    pub modules: Vec<ModuleId>,
    pub selectors: Vec<Selector>,
    pub catalog_path: Option<PathBuf>,
    pub defects_path: Option<PathBuf>,
    pub skip_master_alloc: bool,
    pub without_trigger: bool,
    pub chip_init: ChipInit,
    pub powercycle: bool,
}

/// The arbiter-ensure surface: either a compute job naming the board it
/// wants mediated, or an explicit request to launch the arbiter itself.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ArbiterRequest {
    Compute(String),
    Launch(String),
}

#[derive(Debug, Clone, Default)]
pub struct SubmitOptions {
    pub resources: Option<ResourceOptions>,
    pub arbiter: Option<ArbiterRequest>,
}

impl SubmitOptions {
    /// Parse all plugin options out of a `NAME=ARGS` pair iterator
    /// (typically the submission environment).
    pub fn parse<I, S>(vars: I) -> crate::Result<SubmitOptions>
    where
        I: IntoIterator<Item = (S, S)>,
        S: AsRef<str>,
    {
        let mut resources = ResourceOptions::default();
        let mut seen_resource_opt = false;
        let mut arbiter: Option<ArbiterRequest> = None;

        for (name, args) in vars {
            let (name, args) = (name.as_ref(), args.as_ref());
            if let Some(opt) = name.strip_prefix(RESOURCE_PREFIX) {
                apply_resource_option(&mut resources, opt, OptionValue::new(args))?;
                seen_resource_opt = true;
            } else if let Some(opt) = name.strip_prefix(ARBITER_PREFIX) {
                apply_arbiter_option(&mut arbiter, opt, OptionValue::new(args))?;
            }
        }

        if resources.chip_init == ChipInit::Skip && resources.powercycle {
            return Err(SubmitError::Validation(
                "Power cycling requires chip initialization".to_string(),
            ));
        }
        Ok(SubmitOptions {
            resources: seen_resource_opt.then_some(resources),
            arbiter,
        })
    }
}

fn apply_resource_option(
    opts: &mut ResourceOptions,
    name: &str,
    value: OptionValue,
) -> crate::Result<()> {
    match name {
        "module" => {
            opts.modules
                .extend(parse_list::<ModuleId>(name, value.require_value(name)?)?);
        }
        "board" => {
            parse_selectors(&mut opts.selectors, name, &value, true, |id, mode| {
                Selector::Board(BoardId::new(id), mode)
            })?;
        }
        "board_without_aout" => {
            parse_selectors(&mut opts.selectors, name, &value, false, |id, mode| {
                Selector::Board(BoardId::new(id), mode)
            })?;
        }
        "chip" => {
            parse_selectors(&mut opts.selectors, name, &value, true, |id, mode| {
                Selector::Chip(ChipId::new(id), mode)
            })?;
        }
        "chip_without_aout" => {
            parse_selectors(&mut opts.selectors, name, &value, false, |id, mode| {
                Selector::Chip(ChipId::new(id), mode)
            })?;
        }
        "reticle" => {
            parse_selectors(&mut opts.selectors, name, &value, true, |id, mode| {
                Selector::Reticle(ReticleId::new(id), mode)
            })?;
        }
        "reticle_without_aout" => {
            parse_selectors(&mut opts.selectors, name, &value, false, |id, mode| {
                Selector::Reticle(ReticleId::new(id), mode)
            })?;
        }
        "reticle_of_chip" => {
            parse_selectors(&mut opts.selectors, name, &value, true, |id, mode| {
                Selector::ReticleOfChip(ChipId::new(id), mode)
            })?;
        }
        "reticle_of_chip_without_aout" => {
            parse_selectors(&mut opts.selectors, name, &value, false, |id, mode| {
                Selector::ReticleOfChip(ChipId::new(id), mode)
            })?;
        }
        "catalog_path" => {
            opts.catalog_path = Some(PathBuf::from(value.require_value(name)?));
        }
        "defects_path" => {
            opts.defects_path = Some(PathBuf::from(value.require_value(name)?));
        }
        "skip_master_alloc" => {
            // historical surface: either a bare flag or an 0/1 argument
            opts.skip_master_alloc = match value {
                OptionValue::Flag => true,
                OptionValue::Value(v) => match v.as_str() {
                    "0" => false,
                    "1" => true,
                    other => {
                        return Err(SubmitError::Validation(format!(
                            "Option {name} expects 0 or 1, got {other}"
                        )));
                    }
                },
            };
        }
        "without_trigger" => {
            require_flag(name, &value)?;
            opts.without_trigger = true;
        }
        "skip_chip_init" => {
            require_flag(name, &value)?;
            set_chip_init(opts, ChipInit::Skip)?;
        }
        "force_chip_init" => {
            require_flag(name, &value)?;
            set_chip_init(opts, ChipInit::Force)?;
        }
        "powercycle" => {
            require_flag(name, &value)?;
            opts.powercycle = true;
        }
        other => {
            return Err(SubmitError::Validation(format!(
                "Unknown resource option {other}"
            )));
        }
    }
    Ok(())
}

fn apply_arbiter_option(
    arbiter: &mut Option<ArbiterRequest>,
    name: &str,
    value: OptionValue,
) -> crate::Result<()> {
    let request = match name {
        "board_id" => ArbiterRequest::Compute(value.require_value(name)?.to_string()),
        "launch" => ArbiterRequest::Launch(value.require_value(name)?.to_string()),
        other => {
            return Err(SubmitError::Validation(format!(
                "Unknown arbiter option {other}"
            )));
        }
    };
    if arbiter.is_some() {
        return Err(SubmitError::Validation(
            "Options board_id and launch are mutually exclusive".to_string(),
        ));
    }
    *arbiter = Some(request);
    Ok(())
}

fn require_flag(name: &str, value: &OptionValue) -> crate::Result<()> {
    match value {
        OptionValue::Flag => Ok(()),
        OptionValue::Value(v) => Err(SubmitError::Validation(format!(
            "Option {name} takes no value, got {v}"
        ))),
    }
}

fn set_chip_init(opts: &mut ResourceOptions, init: ChipInit) -> crate::Result<()> {
    if opts.chip_init != ChipInit::Default && opts.chip_init != init {
        return Err(SubmitError::Validation(
            "Options skip_chip_init and force_chip_init are mutually exclusive".to_string(),
        ));
    }
    opts.chip_init = init;
    Ok(())
}

fn parse_list<T: FromStr>(name: &str, args: &str) -> crate::Result<Vec<T>> {
    args.split(',')
        .map(|item| {
            item.trim().parse::<T>().map_err(|_| {
                SubmitError::Validation(format!("Option {name}: invalid argument {item:?}"))
            })
        })
        .collect()
}

/// Parse a comma list of selector arguments, each `<id>` or (when the
/// option allows analog readout) `<id>:<slot>`.
fn parse_selectors(
    selectors: &mut Vec<Selector>,
    name: &str,
    value: &OptionValue,
    with_aout: bool,
    make: impl Fn(u32, Option<AoutMode>) -> Selector,
) -> crate::Result<()> {
    for item in value.require_value(name)?.split(',') {
        let item = item.trim();
        let (id, mode) = match item.split_once(':') {
            Some((id, slot)) => {
                if !with_aout {
                    return Err(SubmitError::Validation(format!(
                        "Option {name} does not take a readout slot"
                    )));
                }
                let mode = match slot {
                    "0" => AoutMode::Aout0,
                    "1" => AoutMode::Aout1,
                    other => {
                        return Err(SubmitError::Validation(format!(
                            "Option {name}: invalid readout slot {other:?}"
                        )));
                    }
                };
                (id, Some(mode))
            }
            None => (item, with_aout.then_some(AoutMode::Both)),
        };
        let id = id.parse::<u32>().map_err(|_| {
            SubmitError::Validation(format!("Option {name}: invalid argument {item:?}"))
        })?;
        selectors.push(make(id, mode));
    }
    Ok(())
}
