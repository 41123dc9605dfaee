use std::path::Path;

/// How to launch the tool server process.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerCommand {
    pub program: String,
    pub args: Vec<String>,
    /// Extra environment for the child, on top of the inherited one.
    pub envs: Vec<(String, String)>,
}

impl ServerCommand {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            envs: Vec::new(),
        }
    }

    /// Pick an interpreter from the script extension: `.js` runs under
    /// `node`, `.py` under `python3`, anything else is executed directly.
    pub fn from_path(path: &str) -> Self {
        match Path::new(path).extension().and_then(|e| e.to_str()) {
            Some("js") => Self::new("node", vec![path.to_string()]),
            Some("py") => Self::new("python3", vec![path.to_string()]),
            _ => Self::new(path, Vec::new()),
        }
    }

    /// The running executable with the given subcommand.
    pub fn current_exe(subcommand: &str) -> std::io::Result<Self> {
        let exe = std::env::current_exe()?;
        Ok(Self::new(exe.to_string_lossy(), vec![subcommand.to_string()]))
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// Display form for logs. Environment values are omitted.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}
