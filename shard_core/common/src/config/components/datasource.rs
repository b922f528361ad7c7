use serde::Deserialize;

/// A named physical database connection spec. Identity is the map key in the
/// `dataSources` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSourceConfig {
    pub driver_name: String,
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_max_idle")]
    pub max_idle: u32,
    #[serde(default = "default_max_open")]
    pub max_open: u32,
}

fn default_max_idle() -> u32 {
    2
}

fn default_max_open() -> u32 {
    10
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_datasource_defaults() {
        let yaml = r#"
driverName: mysql
url: "root@tcp(localhost:3306)/ds_0"
"#;
        let ds: DataSourceConfig = serde_yaml::from_str(yaml).expect("parse data source");
        assert_eq!(ds.driver_name, "mysql");
        assert_eq!(ds.max_idle, 2);
        assert_eq!(ds.max_open, 10);
        assert!(ds.username.is_none());
    }
}
