//! systemd service installation
//!
//! `install` copies the running executable and its configuration into the
//! install directory, writes a unit file that runs `rcon-agent run` from
//! there, and enables it. `uninstall` reverses every step.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{bail, Context, Result};

use rcon_core::config::AgentConfig;

/// systemd unit name
pub const SERVICE_NAME: &str = "single-rcon.service";

/// Directory systemd loads administrator units from
pub const SYSTEMD_UNIT_DIR: &str = "/etc/systemd/system";

/// Executable name inside the install directory
const PROGRAM_NAME: &str = "rcon-agent";

/// Config file name inside the install directory
const CONFIG_NAME: &str = "agent.toml";

/// Runs service manager commands
pub trait ServiceManager {
    fn run(&self, args: &[&str]) -> Result<()>;
}

/// `systemctl` on the host
pub struct Systemctl;

impl ServiceManager for Systemctl {
    fn run(&self, args: &[&str]) -> Result<()> {
        let status = Command::new("systemctl")
            .args(args)
            .status()
            .with_context(|| "Failed to run systemctl")?;

        if !status.success() {
            bail!("systemctl {} failed with {}", args.join(" "), status);
        }
        Ok(())
    }
}

/// Render the unit file for an agent installed in `install_dir`
pub fn unit_file(install_dir: &Path) -> String {
    format!(
        "[Unit]\n\
         Description=single-rcon agent\n\
         After=network-online.target\n\
         Wants=network-online.target\n\
         \n\
         [Service]\n\
         Type=simple\n\
         ExecStart={} run\n\
         WorkingDirectory={}\n\
         Restart=always\n\
         RestartSec=5\n\
         \n\
         [Install]\n\
         WantedBy=multi-user.target\n",
        install_dir.join(PROGRAM_NAME).display(),
        install_dir.display()
    )
}

/// Installs and removes the agent service
pub struct Installer<S> {
    install_dir: PathBuf,
    unit_dir: PathBuf,
    host_key_name: PathBuf,
    service: S,
}

impl Installer<Systemctl> {
    /// Installer for the host's systemd
    pub fn systemd(config: &AgentConfig) -> Self {
        Self::new(config, PathBuf::from(SYSTEMD_UNIT_DIR), Systemctl)
    }
}

impl<S: ServiceManager> Installer<S> {
    pub fn new(config: &AgentConfig, unit_dir: PathBuf, service: S) -> Self {
        // The service runs from the install directory, so a relative host
        // key path lands there.
        let host_key_name = if config.host_key_path.is_absolute() {
            config.host_key_path.clone()
        } else {
            config.install.join(&config.host_key_path)
        };

        Self {
            install_dir: config.install.clone(),
            unit_dir,
            host_key_name,
            service,
        }
    }

    fn unit_path(&self) -> PathBuf {
        self.unit_dir.join(SERVICE_NAME)
    }

    /// Copy `executable` and `config_path` into place and enable the service
    pub fn install(&self, executable: &Path, config_path: &Path) -> Result<()> {
        if !self.unit_dir.is_dir() {
            bail!(
                "{:?} not found; installation requires systemd",
                self.unit_dir
            );
        }

        create_private_dir(&self.install_dir)?;

        let program = self.install_dir.join(PROGRAM_NAME);
        fs::copy(executable, &program)
            .with_context(|| format!("Failed to copy {:?} to {:?}", executable, program))?;
        set_mode(&program, 0o755)?;

        let config = self.install_dir.join(CONFIG_NAME);
        fs::copy(config_path, &config)
            .with_context(|| format!("Failed to copy {:?} to {:?}", config_path, config))?;
        set_mode(&config, 0o600)?;

        let unit_path = self.unit_path();
        fs::write(&unit_path, unit_file(&self.install_dir))
            .with_context(|| format!("Failed to write {:?}", unit_path))?;
        tracing::info!("Wrote {:?}", unit_path);

        self.service.run(&["daemon-reload"])?;
        self.service.run(&["enable", "--now", SERVICE_NAME])?;
        Ok(())
    }

    /// Stop the service and remove everything `install` created
    pub fn uninstall(&self) -> Result<()> {
        if let Err(e) = self.service.run(&["disable", "--now", SERVICE_NAME]) {
            tracing::warn!("{}", e);
        }

        remove_file(&self.install_dir.join(PROGRAM_NAME))?;
        remove_file(&self.install_dir.join(CONFIG_NAME))?;
        remove_file(&self.host_key_name)?;

        match fs::remove_dir(&self.install_dir) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to remove {:?}", self.install_dir))
            }
        }

        remove_file(&self.unit_path())?;
        self.service.run(&["daemon-reload"])?;
        Ok(())
    }
}

fn create_private_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).with_context(|| format!("Failed to create {:?}", path))?;
    set_mode(path, 0o700)
}

fn remove_file(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => {
            tracing::info!("Removed {:?}", path);
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("Failed to remove {:?}", path)),
    }
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
        .with_context(|| format!("Failed to set permissions on {:?}", path))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use tempfile::TempDir;

    #[derive(Default)]
    struct Recorder {
        calls: RefCell<Vec<String>>,
    }

    impl ServiceManager for &Recorder {
        fn run(&self, args: &[&str]) -> Result<()> {
            self.calls.borrow_mut().push(args.join(" "));
            Ok(())
        }
    }

    fn agent_config(install: &Path) -> AgentConfig {
        let text = format!(
            "install = {:?}\n[broker]\naddress = \"b:2222\"\nhost_key = \"k\"\nusername = \"u\"\nprivate_key = \"p\"\n",
            install
        );
        toml::from_str(&text).unwrap()
    }

    #[test]
    fn test_unit_file_runs_from_install_dir() {
        let unit = unit_file(Path::new("/opt/single-rcon"));
        assert!(unit.contains("ExecStart=/opt/single-rcon/rcon-agent run\n"));
        assert!(unit.contains("WorkingDirectory=/opt/single-rcon\n"));
        assert!(unit.contains("WantedBy=multi-user.target"));
    }

    #[test]
    fn test_install_then_uninstall() {
        let root = TempDir::new().unwrap();
        let units = root.path().join("units");
        fs::create_dir(&units).unwrap();
        let install = root.path().join("opt");
        let exe = root.path().join("exe");
        let config_path = root.path().join("agent.toml");
        fs::write(&exe, b"binary").unwrap();
        fs::write(&config_path, b"config").unwrap();

        let recorder = Recorder::default();
        let installer = Installer::new(&agent_config(&install), units.clone(), &recorder);

        installer.install(&exe, &config_path).unwrap();
        assert_eq!(fs::read(install.join("rcon-agent")).unwrap(), b"binary");
        assert_eq!(fs::read(install.join("agent.toml")).unwrap(), b"config");
        assert!(units.join(SERVICE_NAME).exists());

        fs::write(install.join("hostkey"), b"key").unwrap();
        installer.uninstall().unwrap();
        assert!(!install.exists());
        assert!(!units.join(SERVICE_NAME).exists());

        assert_eq!(
            *recorder.calls.borrow(),
            vec![
                "daemon-reload".to_string(),
                format!("enable --now {}", SERVICE_NAME),
                format!("disable --now {}", SERVICE_NAME),
                "daemon-reload".to_string(),
            ]
        );
    }

    #[test]
    fn test_install_requires_unit_dir() {
        let root = TempDir::new().unwrap();
        let recorder = Recorder::default();
        let installer = Installer::new(
            &agent_config(&root.path().join("opt")),
            root.path().join("missing"),
            &recorder,
        );

        assert!(installer
            .install(Path::new("exe"), Path::new("agent.toml"))
            .is_err());
        assert!(recorder.calls.borrow().is_empty());
    }
}
