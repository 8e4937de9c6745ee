use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Resource limits applied to a sandboxed run.
///
/// Sizes are in kilobytes, times in milliseconds. `None` means the sandbox
/// default applies.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize, Default)]
pub struct Constraints {
    /// CPU time limit in milliseconds.
    pub time_ms: Option<u64>,
    /// Memory limit in kilobytes.
    pub memory_kb: Option<u64>,
    /// Total writable storage in kilobytes.
    pub total_storage_kb: Option<u64>,
    /// Maximum number of processes/threads.
    pub processes: Option<u32>,
}

impl Constraints {
    /// Overlay `other` on top of `self`: fields set in `other` win.
    pub fn merged_with(&self, other: &Constraints) -> Constraints {
        Constraints {
            time_ms: other.time_ms.or(self.time_ms),
            memory_kb: other.memory_kb.or(self.memory_kb),
            total_storage_kb: other.total_storage_kb.or(self.total_storage_kb),
            processes: other.processes.or(self.processes),
        }
    }
}

/// Supported submission languages.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Language {
    #[serde(rename = "C++")]
    Cpp,
    Java,
    Python,
}

impl Language {
    pub const ALL: &'static [Language] = &[Self::Cpp, Self::Java, Self::Python];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cpp => "C++",
            Self::Java => "Java",
            Self::Python => "Python",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "C++" => Ok(Self::Cpp),
            "Java" => Ok(Self::Java),
            "Python" => Ok(Self::Python),
            _ => Err(format!("unsupported language '{s}'")),
        }
    }
}

/// Per-language toolchain configuration.
///
/// Command templates contain `{src_path}` and `{binary_path}` placeholders
/// which are substituted literally at invocation time.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LanguageConfig {
    pub display_name: String,
    /// Filename the source is written to inside the sandbox.
    pub src_file: String,
    /// Filename of the produced artifact inside the sandbox.
    pub binary_file: String,
    pub compile_command: String,
    pub execute_command: String,
    /// Limits applied while compiling.
    pub compile_constraints: Constraints,
    /// Limits overlaid on the problem's limits while executing.
    pub run_constraints: Constraints,
}

impl LanguageConfig {
    /// Substitute the placeholder tokens into the compile command.
    pub fn compile_argv(&self) -> Vec<String> {
        substitute(&self.compile_command, &self.src_file, &self.binary_file)
    }

    /// Substitute the placeholder tokens into the execute command.
    pub fn execute_argv(&self) -> Vec<String> {
        substitute(&self.execute_command, &self.src_file, &self.binary_file)
    }
}

fn substitute(template: &str, src_file: &str, binary_file: &str) -> Vec<String> {
    template
        .split_whitespace()
        .map(|part| {
            part.replace("{src_path}", src_file)
                .replace("{binary_path}", binary_file)
        })
        .collect()
}

/// Static language table, loaded once at process start and never mutated.
#[derive(Debug)]
pub struct LanguageRegistry {
    entries: Vec<(Language, LanguageConfig)>,
}

impl LanguageRegistry {
    /// The built-in toolchain table.
    pub fn builtin() -> Self {
        let entries = vec![
            (
                Language::Cpp,
                LanguageConfig {
                    display_name: "C++20".into(),
                    src_file: "program.cpp".into(),
                    binary_file: "a.out".into(),
                    compile_command:
                        "/usr/bin/g++ -O2 -w -fmax-errors=3 -std=c++20 {src_path} -lm -o {binary_path}"
                            .into(),
                    execute_command: "./{binary_path}".into(),
                    compile_constraints: Constraints {
                        time_ms: Some(5000),
                        memory_kb: Some(262144),
                        total_storage_kb: Some(262144),
                        processes: Some(5),
                    },
                    run_constraints: Constraints {
                        processes: Some(1),
                        ..Default::default()
                    },
                },
            ),
            (
                Language::Java,
                LanguageConfig {
                    display_name: "Java".into(),
                    src_file: "Solution.java".into(),
                    binary_file: "Solution.class".into(),
                    compile_command: "/usr/bin/javac {src_path}".into(),
                    execute_command: "/usr/bin/java Solution".into(),
                    compile_constraints: Constraints {
                        time_ms: Some(5000),
                        memory_kb: Some(262144),
                        total_storage_kb: Some(262144),
                        processes: Some(20),
                    },
                    run_constraints: Constraints {
                        processes: Some(20),
                        ..Default::default()
                    },
                },
            ),
            (
                Language::Python,
                LanguageConfig {
                    display_name: "Python 3".into(),
                    src_file: "program.py".into(),
                    binary_file: "run.py".into(),
                    compile_command: "/usr/bin/cp {src_path} {binary_path}".into(),
                    execute_command: "/usr/bin/python3 {binary_path}".into(),
                    compile_constraints: Constraints {
                        time_ms: Some(1000),
                        memory_kb: Some(262144),
                        total_storage_kb: Some(262144),
                        processes: Some(5),
                    },
                    run_constraints: Constraints {
                        processes: Some(1),
                        ..Default::default()
                    },
                },
            ),
        ];
        Self { entries }
    }

    pub fn get(&self, language: Language) -> &LanguageConfig {
        // The builtin table covers every Language variant.
        self.entries
            .iter()
            .find(|(l, _)| *l == language)
            .map(|(_, c)| c)
            .unwrap_or_else(|| unreachable!("missing language config for {language}"))
    }
}

impl Default for LanguageRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
