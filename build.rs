use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::time::SystemTime;

use walkdir::WalkDir;

const ENV_LITERAL: &str = "\"FIELDSTAGE_";

/// `src/pipeline/config.rs` -> `pipeline::config`.
fn module_path(file: &Path) -> String {
    let rel = file.strip_prefix("src").unwrap_or(file).with_extension("");
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .filter(|part| part != "mod" && part != "main")
        .collect();
    if parts.is_empty() {
        "crate".to_string()
    } else {
        parts.join("::")
    }
}

/// Quoted `FIELDSTAGE_*` literals outside the test module. Prefixes such as
/// `"FIELDSTAGE_"` and the warn log marker are not settings.
fn setting_keys(source: &str) -> Vec<&str> {
    let code = source
        .split_once("#[cfg(test)]")
        .map_or(source, |(head, _)| head);
    let mut keys = Vec::new();
    let mut rest = code;
    while let Some(start) = rest.find(ENV_LITERAL) {
        let literal = &rest[start + 1..];
        let Some(end) = literal.find('"') else {
            break;
        };
        let key = &literal[..end];
        if key
            .bytes()
            .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit() || b == b'_')
            && !key.ends_with('_')
            && key != "FIELDSTAGE_WARN"
        {
            keys.push(key);
        }
        rest = &literal[end + 1..];
    }
    keys
}

fn write_generated_allowlist() -> std::io::Result<()> {
    let mut owners: BTreeMap<String, String> = BTreeMap::new();
    for entry in WalkDir::new("src").sort_by_file_name() {
        let entry = entry.map_err(std::io::Error::other)?;
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("rs") {
            continue;
        }
        let source = fs::read_to_string(path)?;
        for key in setting_keys(&source) {
            owners
                .entry(key.to_string())
                .or_insert_with(|| module_path(path));
        }
    }

    let out_dir = env::var("OUT_DIR").expect("OUT_DIR is set by cargo");
    let generated = Path::new(&out_dir).join("fieldstage_env_allowlist.rs");
    let mut f = fs::File::create(generated)?;
    writeln!(f, "/// (variable, module that reads it)")?;
    writeln!(f, "pub const GENERATED_ENV_ALLOWLIST: &[(&str, &str)] = &[")?;
    for (key, owner) in owners {
        writeln!(f, "    (\"{key}\", \"{owner}\"),")?;
    }
    writeln!(f, "];")?;
    Ok(())
}

fn main() {
    write_generated_allowlist().expect("failed to generate FIELDSTAGE env allowlist");

    let now = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .expect("system clock before unix epoch");
    println!(
        "cargo:rustc-env=BUILD_UUID={:x}-{:x}",
        now.as_secs(),
        now.subsec_nanos()
    );
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=src");
}
