use std::path::Path;

use tn_domain::config::NodeConfig;

/// Load the node configuration from `explicit`, else the path in
/// `TN_CONFIG`, else `node.toml`.  A missing file yields the defaults.
/// Returns the parsed [`NodeConfig`] and the path that was used.
pub fn load_config(explicit: Option<&str>) -> anyhow::Result<(NodeConfig, String)> {
    let config_path = match explicit {
        Some(p) => p.to_string(),
        None => std::env::var("TN_CONFIG").unwrap_or_else(|_| "node.toml".into()),
    };

    let config = if Path::new(&config_path).exists() {
        let raw = std::fs::read_to_string(&config_path)
            .map_err(|e| anyhow::anyhow!("reading {config_path}: {e}"))?;
        toml::from_str(&raw).map_err(|e| anyhow::anyhow!("parsing {config_path}: {e}"))?
    } else {
        NodeConfig::default()
    };

    Ok((config, config_path))
}
