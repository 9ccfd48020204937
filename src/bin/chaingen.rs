//! Build-time address codegen for the Solidity side of the template.
//!
//! Contract sources carry a placeholder Reality.eth address so the
//! same `.sol` files compile against any chain; before compilation
//! this tool substitutes the placeholder with the registry address for
//! the target chain. Pure text substitution, no Solidity parsing.
//!
//! Usage: chaingen <chain-id> <file.sol> [more.sol ...]

use anyhow::{bail, Context};
use reality_fetch::config::{ChainRegistry, Config};
use std::path::Path;
use tracing::info;

/// The literal that marks the Reality.eth address slot in `.sol`
/// sources.
const PLACEHOLDER: &str = "0xbeefbeefbeefbeefbeefbeefbeefbeefbeefbeef";

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let Some(chain_arg) = args.next() else {
        bail!("usage: chaingen <chain-id> <file.sol> [more.sol ...]");
    };
    let chain_id: u64 = chain_arg
        .parse()
        .with_context(|| format!("{chain_arg:?} is not a chain id"))?;
    let files: Vec<String> = args.collect();
    if files.is_empty() {
        bail!("no .sol files given");
    }

    let config = if Path::new("reality.toml").exists() {
        Config::load(Path::new("reality.toml"))?
    } else {
        Config::from_env()
    };
    let registry = ChainRegistry::from_config(&config)?;
    let settings = registry.require(chain_id)?;
    // Checksummed form, as Solidity sources expect.
    let replacement = settings.reality_address.to_checksum(None);

    for file in &files {
        let contents =
            std::fs::read_to_string(file).with_context(|| format!("reading {file}"))?;
        let (rewritten, count) = substitute(&contents, PLACEHOLDER, &replacement);
        if count == 0 {
            info!(file = %file, "no placeholder found, left untouched");
            continue;
        }
        std::fs::write(file, rewritten).with_context(|| format!("writing {file}"))?;
        info!(
            file = %file,
            chain_id = chain_id,
            address = %replacement,
            occurrences = count,
            "placeholder substituted"
        );
    }

    Ok(())
}

/// Replace every case-insensitive occurrence of `needle` (an address
/// literal) in `haystack`, returning the rewritten text and the number
/// of replacements.
fn substitute(haystack: &str, needle: &str, replacement: &str) -> (String, usize) {
    // ASCII-only lowering keeps byte offsets aligned with the source.
    let lower = haystack.to_ascii_lowercase();
    let needle = needle.to_ascii_lowercase();
    let mut out = String::with_capacity(haystack.len());
    let mut count = 0;
    let mut cursor = 0;

    while let Some(pos) = lower[cursor..].find(&needle) {
        let start = cursor + pos;
        out.push_str(&haystack[cursor..start]);
        out.push_str(replacement);
        cursor = start + needle.len();
        count += 1;
    }
    out.push_str(&haystack[cursor..]);
    (out, count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_placeholder_case_insensitively() {
        let source = "IRealityETH constant REALITY =\n    IRealityETH(0xBeefBEEFbeefBEEFbeefBEEFbeefBEEFbeefBEEF);\n";
        let (out, count) = substitute(
            source,
            PLACEHOLDER,
            "0x5b7dD1E86623548AF054A4985F7fc8Ccbb554E2c",
        );
        assert_eq!(count, 1);
        assert!(out.contains("IRealityETH(0x5b7dD1E86623548AF054A4985F7fc8Ccbb554E2c)"));
        assert!(!out.to_lowercase().contains(PLACEHOLDER));
    }

    #[test]
    fn untouched_source_reports_zero() {
        let (out, count) = substitute("contract Oracle {}", PLACEHOLDER, "0x");
        assert_eq!(count, 0);
        assert_eq!(out, "contract Oracle {}");
    }
}
