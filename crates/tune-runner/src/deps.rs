use anyhow::{anyhow, Result};
use tracing::{info, warn};

use crate::exec::Shell;

/// Package commands; swapped out in tests.
#[derive(Debug, Clone)]
pub struct PackageCommands {
    pub query: String,
    pub install: String,
    pub remove: String,
}

impl Default for PackageCommands {
    fn default() -> Self {
        Self {
            query: "rpm -q {pkg}".to_string(),
            install: "yum -y install {pkg}".to_string(),
            remove: "yum -y remove {pkg}".to_string(),
        }
    }
}

/// Installs the packages a plan needs and removes exactly those it installed.
#[derive(Debug)]
pub struct DependencyManager {
    shell: Shell,
    commands: PackageCommands,
    already_installed: Vec<String>,
    need_install: Vec<String>,
    installed: Vec<String>,
}

impl DependencyManager {
    pub fn new(packages: &[String], shell: Shell) -> Self {
        Self::with_commands(packages, shell, PackageCommands::default())
    }

    pub fn with_commands(packages: &[String], shell: Shell, commands: PackageCommands) -> Self {
        let mut mgr = Self {
            shell,
            commands,
            already_installed: Vec::new(),
            need_install: Vec::new(),
            installed: Vec::new(),
        };
        for pkg in packages {
            if mgr.is_installed(pkg) {
                mgr.already_installed.push(pkg.clone());
            } else {
                mgr.need_install.push(pkg.clone());
            }
        }
        mgr
    }

    pub fn already_installed(&self) -> &[String] {
        &self.already_installed
    }

    pub fn need_install(&self) -> &[String] {
        &self.need_install
    }

    pub fn installed(&self) -> &[String] {
        &self.installed
    }

    fn run_for(&self, template: &str, pkg: &str) -> bool {
        let command = template.replace("{pkg}", pkg);
        match self.shell.run(&command) {
            Ok(out) => out.success(),
            Err(e) => {
                warn!(package = pkg, error = %e, "package command failed to run");
                false
            }
        }
    }

    fn is_installed(&self, pkg: &str) -> bool {
        self.run_for(&self.commands.query, pkg)
    }

    /// Installs missing packages. Any failure rolls back what this call
    /// installed and reports the failing packages.
    pub fn install(&mut self) -> Result<&[String]> {
        let mut failed = Vec::new();
        for pkg in &self.need_install {
            if self.run_for(&self.commands.install, pkg) {
                info!(package = %pkg, "installed dependency");
                self.installed.push(pkg.clone());
            } else {
                failed.push(pkg.clone());
            }
        }
        if !failed.is_empty() {
            for pkg in self.installed.iter().rev() {
                let _ = self.run_for(&self.commands.remove, pkg);
            }
            self.installed.clear();
            return Err(anyhow!("dependency install failed: {}", failed.join(", ")));
        }
        Ok(&self.installed)
    }

    /// Removes the packages installed by [`DependencyManager::install`], newest first.
    pub fn uninstall(&mut self) -> Result<Vec<String>> {
        let mut removed = Vec::new();
        let mut failed = Vec::new();
        for pkg in self.installed.iter().rev() {
            if self.run_for(&self.commands.remove, pkg) {
                removed.push(pkg.clone());
            } else {
                failed.push(pkg.clone());
            }
        }
        self.installed.clear();
        if !failed.is_empty() {
            return Err(anyhow!("dependency uninstall failed: {}", failed.join(", ")));
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;

    fn fake_commands(db: &Path) -> PackageCommands {
        let db = db.display();
        PackageCommands {
            query: format!("grep -qx {{pkg}} {}", db),
            install: format!("case {{pkg}} in bad*) exit 1;; esac; echo {{pkg}} >> {}", db),
            remove: format!("sed -i '/^{{pkg}}$/d' {}", db),
        }
    }

    fn pkgs(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn installs_missing_and_removes_only_what_it_installed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = dir.path().join("db");
        fs::write(&db, "gcc\n").unwrap();
        let mut mgr =
            DependencyManager::with_commands(&pkgs(&["gcc", "make"]), Shell::new(), fake_commands(&db));
        assert_eq!(mgr.already_installed(), ["gcc"]);
        assert_eq!(mgr.need_install(), ["make"]);
        mgr.install().expect("install");
        assert_eq!(fs::read_to_string(&db).unwrap(), "gcc\nmake\n");
        assert_eq!(mgr.uninstall().expect("uninstall"), vec!["make"]);
        assert_eq!(fs::read_to_string(&db).unwrap(), "gcc\n");
    }

    #[test]
    fn failed_install_rolls_back() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = dir.path().join("db");
        fs::write(&db, "").unwrap();
        let mut mgr = DependencyManager::with_commands(
            &pkgs(&["make", "badpkg"]),
            Shell::new(),
            fake_commands(&db),
        );
        let err = mgr.install().expect_err("badpkg fails");
        assert!(err.to_string().contains("badpkg"), "{}", err);
        assert_eq!(fs::read_to_string(&db).unwrap(), "");
        assert!(mgr.installed().is_empty());
    }

    #[test]
    fn empty_package_list_runs_nothing() {
        let mut mgr = DependencyManager::with_commands(
            &[],
            Shell::new(),
            PackageCommands {
                query: "exit 1".to_string(),
                install: "exit 1".to_string(),
                remove: "exit 1".to_string(),
            },
        );
        assert!(mgr.install().expect("nothing to install").is_empty());
        assert!(mgr.uninstall().expect("nothing to remove").is_empty());
    }
}
