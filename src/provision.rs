//! Provisioning driver
//!
//! Runs a [`ProvisionConfig`] top to bottom: keymap, disk layout, base
//! system bootstrap, fstab, locale, services, bootloader, root password.
//! Apart from the disk layout every step is an opaque external command.
//! The first failing command aborts the run.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::config_file::ProvisionConfig;
use crate::engine::{Disk, DiskInfo, Partition};
use crate::exec::{CommandNode, ExecContext, Input, Streams};

pub struct Provisioner<'a> {
    config: &'a ProvisionConfig,
    ctx: ExecContext,
    fixture: Option<DiskInfo>,
}

impl<'a> Provisioner<'a> {
    pub fn new(config: &'a ProvisionConfig, ctx: ExecContext) -> Self {
        Self {
            config,
            ctx,
            fixture: None,
        }
    }

    /// Starting state of the simulated disk (simulation mode only).
    pub fn with_fixture(mut self, fixture: DiskInfo) -> Self {
        self.fixture = Some(fixture);
        self
    }

    fn root(&self) -> &Path {
        &self.config.root_dir
    }

    /// Run every step in order.
    pub fn run(&self) -> Result<()> {
        self.config.validate().context("Invalid provisioning configuration")?;

        if let Some(keymap) = &self.config.keymap {
            info!("Setting up keyboard layout");
            self.ctx
                .execute("loadkeys", [keymap.as_str()])
                .context("Failed to load keymap")?;
        }

        info!("Setting up partitions");
        self.prepare_disk()?;

        info!("Bootstrapping base system");
        self.bootstrap()?;
        self.generate_fstab()?;

        if let Some(locale) = &self.config.locale {
            info!("Generating locale {}", locale);
            self.setup_locale(locale)?;
        }

        for service in &self.config.services {
            info!("Enabling service {}", service);
            self.chroot(["systemctl", "enable", service.as_str()])
                .with_context(|| format!("Failed to enable {}", service))?;
        }

        if self.config.bootloader.is_some() {
            info!("Installing bootloader");
            self.install_bootloader()?;
        }

        if let Some(password) = &self.config.root_password {
            info!("Setting up root password");
            self.set_root_password(password)?;
        }

        info!("Provisioning of {} complete", self.config.device);
        Ok(())
    }

    fn open_disk(&self) -> Result<Disk> {
        let disk = match &self.fixture {
            Some(fixture) => {
                Disk::open_with_fixture(&self.config.device, self.ctx.clone(), fixture.clone())
            }
            None => Disk::open(&self.config.device, self.ctx.clone()),
        };
        disk.with_context(|| format!("Failed to open {}", self.config.device))
    }

    /// Create, format and mount every configured partition.
    pub fn prepare_disk(&self) -> Result<()> {
        let disk = self.open_disk()?;
        if self.config.wipe {
            disk.wipe()
                .with_context(|| format!("Failed to wipe {}", disk.device()))?;
            disk.ensure_label()?;
        }

        let mut created: Vec<(Partition<'_>, Option<&str>)> = Vec::new();
        for spec in &self.config.partitions {
            let partition = match spec.size.bytes() {
                Some(bytes) => disk.create_partition(&spec.name, spec.kind, bytes),
                None => disk.create_partition_remaining(&spec.name, spec.kind),
            }
            .with_context(|| format!("Failed to create partition '{}'", spec.name))?;
            info!(
                "Created partition {} '{}' at {}",
                partition.number(),
                partition.name(),
                partition.range()
            );
            created.push((partition, spec.mount.as_deref()));
        }

        for (partition, _) in &created {
            partition
                .format()
                .with_context(|| format!("Failed to format {}", partition.node()))?;
        }

        // parents before children: "/" before "/boot"
        created.sort_by_key(|(_, mount)| mount.map(mount_depth).unwrap_or(usize::MAX));
        for (partition, mount) in &created {
            let target = match mount {
                Some(path) => target_path(self.root(), path),
                None if partition.kind().is_swap() => PathBuf::new(),
                None => continue,
            };
            partition
                .mount(&target)
                .with_context(|| format!("Failed to mount {}", partition.node()))?;
        }
        Ok(())
    }

    fn bootstrap(&self) -> Result<()> {
        let mut args = vec!["-K".to_string(), self.root().display().to_string()];
        args.extend(self.config.packages.iter().cloned());
        self.ctx
            .execute("pacstrap", args)
            .context("Failed to bootstrap base system")?;
        Ok(())
    }

    /// `genfstab -U <root> > <root>/etc/fstab`
    fn generate_fstab(&self) -> Result<()> {
        let root = self.root().display().to_string();
        let node = CommandNode::new("genfstab", ["-U", root.as_str()])
            .redirect(self.root().join("etc/fstab"));
        self.ctx
            .raise_run(&node, Streams::default())
            .context("Failed to generate fstab")?;
        Ok(())
    }

    fn setup_locale(&self, locale: &str) -> Result<()> {
        let uncomment = format!("s/^#{}/{}/", locale, locale);
        self.chroot(["sed", "-i", uncomment.as_str(), "/etc/locale.gen"])
            .context("Failed to enable locale in /etc/locale.gen")?;
        self.chroot(["locale-gen"])
            .context("Failed to generate locales")?;

        let node = CommandNode::new("echo", [format!("LANG={}", locale)])
            .redirect(self.root().join("etc/locale.conf"));
        self.ctx
            .raise_run(&node, Streams::default())
            .context("Failed to write locale.conf")?;
        Ok(())
    }

    fn install_bootloader(&self) -> Result<()> {
        let Some(bootloader) = &self.config.bootloader else {
            return Ok(());
        };
        let efi_directory = format!("--efi-directory={}", bootloader.efi_directory);
        let bootloader_id = format!("--bootloader-id={}", bootloader.bootloader_id);
        self.chroot([
            "grub-install",
            "--target=x86_64-efi",
            efi_directory.as_str(),
            bootloader_id.as_str(),
        ])
        .context("Failed to install GRUB")?;
        self.chroot(["grub-mkconfig", "-o", "/boot/grub/grub.cfg"])
            .context("Failed to generate GRUB configuration")?;
        Ok(())
    }

    /// The password goes through stdin, never through an argument vector.
    fn set_root_password(&self, password: &str) -> Result<()> {
        let root = self.root().display().to_string();
        let node = CommandNode::new("arch-chroot", [root.as_str(), "chpasswd"]);
        let input = Input::Bytes(format!("root:{}\n", password).into_bytes());
        self.ctx
            .raise_run(&node, Streams::captured().with_stdin(input))
            .context("Failed to set root password")?;
        Ok(())
    }

    /// `arch-chroot <root> <args...>`
    fn chroot<'s>(&self, args: impl IntoIterator<Item = &'s str>) -> Result<()> {
        let root = self.root().display().to_string();
        let argv: Vec<String> = std::iter::once(root)
            .chain(args.into_iter().map(String::from))
            .collect();
        self.ctx.execute("arch-chroot", argv)?;
        Ok(())
    }
}

/// Number of path components below `/`.
fn mount_depth(path: &str) -> usize {
    path.split('/').filter(|c| !c.is_empty()).count()
}

/// `/mnt` + `/boot` → `/mnt/boot`; `/mnt` + `/` → `/mnt`.
fn target_path(root: &Path, mount: &str) -> PathBuf {
    let relative = mount.trim_start_matches('/');
    if relative.is_empty() {
        root.to_path_buf()
    } else {
        root.join(relative)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mount_depth() {
        assert_eq!(mount_depth("/"), 0);
        assert_eq!(mount_depth("/boot"), 1);
        assert_eq!(mount_depth("/boot/efi/"), 2);
    }

    #[test]
    fn test_target_path() {
        let root = Path::new("/mnt");
        assert_eq!(target_path(root, "/"), PathBuf::from("/mnt"));
        assert_eq!(target_path(root, "/boot"), PathBuf::from("/mnt/boot"));
        assert_eq!(target_path(root, "/var/log"), PathBuf::from("/mnt/var/log"));
    }
}
