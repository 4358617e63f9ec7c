//! Command-line parsing.
//!
//! Grounded on the original `rsh_parse_args()` (`rsh.h`'s declaration,
//! `main.c`'s getopt loop) plus `clap`'s builder API, the way the teacher's
//! own `fat32-fs-std` demo drives its block-device CLI with `clap::App`.

use std::path::PathBuf;

use clap::{App, Arg};

use crate::context::ShellConfig;
use crate::error::{Error, Result};
use crate::image::{MIN_CLUSTER_SIZE_POLICY, MIN_IMAGE_SIZE_POLICY};

/// `rsh_parse_args`: build a [`ShellConfig`] from `argv`.
pub fn parse(args: impl IntoIterator<Item = String>) -> Result<ShellConfig> {
    let matches = App::new("rsh")
        .about("a unified-namespace shell over the host filesystem and a built-in FAT16 image")
        .arg(Arg::with_name("debug").short("d").long("debug").help("enable verbose diagnostic logging"))
        .arg(Arg::with_name("login").short("l").long("login").help("run as a login shell"))
        .arg(
            Arg::with_name("filesystem")
                .short("f")
                .long("filesystem")
                .takes_value(true)
                .value_name("PATH")
                .help("path to the built-in filesystem image"),
        )
        .arg(
            Arg::with_name("geometry")
                .short("g")
                .long("geometry")
                .takes_value(true)
                .value_name("SIZE:CLUSTER")
                .help("image size and cluster size in bytes, e.g. 1048576:4096"),
        )
        .arg(Arg::with_name("override").short("o").long("override").help("allow --geometry to diverge from the built-in policy bounds"))
        .arg(Arg::with_name("script").value_name("SCRIPT").help("run this script non-interactively"))
        .arg(Arg::with_name("script_args").value_name("ARG").multiple(true))
        .get_matches_from_safe(args)
        .map_err(|e| Error::Invalid(e.to_string()))?;

    let mut config = ShellConfig {
        debug: matches.is_present("debug"),
        login: matches.is_present("login"),
        ..ShellConfig::default()
    };

    if let Some(path) = matches.value_of("filesystem") {
        config.image_path = PathBuf::from(path);
    }

    config.allow_geometry_override = matches.is_present("override");

    if let Some(geometry) = matches.value_of("geometry") {
        let (size, cluster) = parse_geometry(geometry, config.allow_geometry_override)?;
        config.image_size = size;
        config.cluster_size = cluster;
    }

    if let Some(script) = matches.value_of("script") {
        config.script = Some(PathBuf::from(script));
        config.script_args = matches.values_of("script_args").map(|v| v.map(String::from).collect()).unwrap_or_default();
    }

    Ok(config)
}

/// `SIZE:CLUSTER`, both plain decimal byte counts.
fn parse_geometry(spec: &str, allow_override: bool) -> Result<(u64, u32)> {
    let (size, cluster) = spec.split_once(':').ok_or_else(|| Error::Invalid(format!("malformed geometry {spec:?}, expected SIZE:CLUSTER")))?;
    let size: u64 = size.parse().map_err(|_| Error::Invalid(format!("bad image size {size:?}")))?;
    let cluster: u32 = cluster.parse().map_err(|_| Error::Invalid(format!("bad cluster size {cluster:?}")))?;
    if !allow_override && (size < MIN_IMAGE_SIZE_POLICY || cluster < MIN_CLUSTER_SIZE_POLICY) {
        return Err(Error::Invalid(format!(
            "geometry {size}:{cluster} is below the built-in policy minimum ({MIN_IMAGE_SIZE_POLICY}:{MIN_CLUSTER_SIZE_POLICY}); pass --override to force it"
        )));
    }
    Ok((size, cluster))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(s: &str) -> Vec<String> {
        std::iter::once("rsh".to_string()).chain(s.split_whitespace().map(String::from)).collect()
    }

    #[test]
    fn defaults_to_interactive_no_script() {
        let config = parse(argv("")).unwrap();
        assert!(config.script.is_none());
        assert!(!config.debug);
    }

    #[test]
    fn parses_script_and_trailing_args() {
        let config = parse(argv("myscript.rsh a b c")).unwrap();
        assert_eq!(config.script, Some(PathBuf::from("myscript.rsh")));
        assert_eq!(config.script_args, vec!["a", "b", "c"]);
    }

    #[test]
    fn geometry_below_policy_requires_override() {
        let err = parse(argv("-g 16:8")).unwrap_err();
        assert!(matches!(err, Error::Invalid(_)));
    }

    #[test]
    fn geometry_with_override_is_accepted_even_if_small() {
        let config = parse(argv("-o -g 16:8")).unwrap();
        assert_eq!(config.image_size, MIN_IMAGE_SIZE_POLICY);
    }
}
