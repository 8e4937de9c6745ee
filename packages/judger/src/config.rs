use serde::Deserialize;

/// Judging worker configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct JudgerConfig {
    /// Number of sandbox boxes this worker owns. Default: 4.
    #[serde(default = "default_slots")]
    pub slots: u32,
    /// Isolate executable path. Default: "isolate".
    #[serde(default = "default_isolate_bin")]
    pub isolate_bin: String,
    /// Root under which isolate places its boxes.
    /// Default: "/var/local/lib/isolate".
    #[serde(default = "default_box_root")]
    pub box_root: String,
    /// Host path of testlib.h, copied into the box for checker builds.
    /// Default: "testlib.h".
    #[serde(default = "default_testlib_path")]
    pub testlib_path: String,
}

fn default_slots() -> u32 {
    4
}
fn default_isolate_bin() -> String {
    "isolate".into()
}
fn default_box_root() -> String {
    "/var/local/lib/isolate".into()
}
fn default_testlib_path() -> String {
    "testlib.h".into()
}

impl Default for JudgerConfig {
    fn default() -> Self {
        Self {
            slots: default_slots(),
            isolate_bin: default_isolate_bin(),
            box_root: default_box_root(),
            testlib_path: default_testlib_path(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_fields() {
        let config: JudgerConfig = serde_json::from_str(r#"{ "slots": 8 }"#).unwrap();
        assert_eq!(config.slots, 8);
        assert_eq!(config.isolate_bin, "isolate");
        assert_eq!(config.box_root, "/var/local/lib/isolate");
    }
}
