//! Tests for the provisioning driver in simulation mode

use archstrap::config_file::{BootloaderConfig, ProvisionConfig};
use archstrap::engine::DiskInfo;
use archstrap::engine::listing::Sectors;
use archstrap::error::ProvisionError;
use archstrap::exec::ExecContext;
use archstrap::provision::Provisioner;
use tempfile::tempdir;

fn full_config() -> ProvisionConfig {
    ProvisionConfig {
        keymap: Some("fr-latin1".to_string()),
        locale: Some("en_US.UTF-8".to_string()),
        bootloader: Some(BootloaderConfig::default()),
        root_password: Some("hunter2".to_string()),
        ..ProvisionConfig::default()
    }
}

/// Index of the first journal line equal to `line`.
fn index_of(journal: &[String], line: &str) -> usize {
    journal
        .iter()
        .position(|l| l == line)
        .unwrap_or_else(|| panic!("'{line}' not in journal: {journal:#?}"))
}

#[test]
fn test_full_run_order() {
    let config = full_config();
    let ctx = ExecContext::simulated();
    Provisioner::new(&config, ctx.clone()).run().unwrap();

    let journal = ctx.journal();
    let expected_order = [
        "loadkeys fr-latin1",
        "wipefs -a /dev/sda",
        "mkfs.fat -F 32 /dev/sda1",
        "mkswap /dev/sda2",
        "mkfs.ext4 /dev/sda3",
        "mount --mkdir /dev/sda3 /mnt",
        "mount --mkdir /dev/sda1 /mnt/boot",
        "swapon /dev/sda2",
        "pacstrap -K /mnt base linux linux-firmware",
        "genfstab -U /mnt > /mnt/etc/fstab",
        "arch-chroot /mnt locale-gen",
        "echo 'LANG=en_US.UTF-8' > /mnt/etc/locale.conf",
        "arch-chroot /mnt systemctl enable NetworkManager",
        "arch-chroot /mnt grub-install --target=x86_64-efi --efi-directory=/boot --bootloader-id=GRUB",
        "arch-chroot /mnt grub-mkconfig -o /boot/grub/grub.cfg",
        "arch-chroot /mnt chpasswd",
    ];
    let positions: Vec<usize> = expected_order.iter().map(|l| index_of(&journal, l)).collect();
    assert!(
        positions.windows(2).all(|w| w[0] < w[1]),
        "unexpected order: {journal:#?}"
    );
    assert_eq!(journal.first().map(String::as_str), Some("loadkeys fr-latin1"));
    assert_eq!(journal.last().map(String::as_str), Some("arch-chroot /mnt chpasswd"));
}

#[test]
fn test_partitions_created_before_formatting() {
    let config = full_config();
    let ctx = ExecContext::simulated();
    Provisioner::new(&config, ctx.clone()).run().unwrap();

    let journal = ctx.journal();
    let last_mkpart = journal.iter().rposition(|l| l.contains(" mkpart ")).unwrap();
    let first_format = index_of(&journal, "mkfs.fat -F 32 /dev/sda1");
    assert_eq!(journal.iter().filter(|l| l.contains(" mkpart ")).count(), 3);
    assert!(last_mkpart < first_format);
    assert!(journal.contains(&"parted --json /dev/sda -s set 2 esp on".to_string()));
}

#[test]
fn test_password_never_in_command_line() {
    let config = full_config();
    let ctx = ExecContext::simulated();
    Provisioner::new(&config, ctx.clone()).run().unwrap();

    assert!(!ctx.journal().iter().any(|l| l.contains("hunter2")));
}

#[test]
fn test_optional_steps_are_skipped() {
    let config = ProvisionConfig {
        services: Vec::new(),
        ..ProvisionConfig::default()
    };
    let ctx = ExecContext::simulated();
    Provisioner::new(&config, ctx.clone()).run().unwrap();

    let journal = ctx.journal();
    assert!(!journal.iter().any(|l| l.starts_with("loadkeys")));
    assert!(!journal.iter().any(|l| l.starts_with("arch-chroot")));
    assert_eq!(
        journal.last().map(String::as_str),
        Some("genfstab -U /mnt > /mnt/etc/fstab")
    );
}

#[test]
fn test_simulation_writes_nothing_under_root() {
    let dir = tempdir().unwrap();
    let config = ProvisionConfig {
        root_dir: dir.path().to_path_buf(),
        ..full_config()
    };
    Provisioner::new(&config, ExecContext::simulated()).run().unwrap();

    assert!(!dir.path().join("etc/fstab").exists());
    assert!(!dir.path().join("etc/locale.conf").exists());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn test_invalid_config_runs_nothing() {
    let config = ProvisionConfig {
        partitions: Vec::new(),
        ..ProvisionConfig::default()
    };
    let ctx = ExecContext::simulated();
    assert!(Provisioner::new(&config, ctx.clone()).run().is_err());
    assert!(ctx.journal().is_empty());
}

#[test]
fn test_layout_too_large_aborts_before_bootstrap() {
    let fixture = DiskInfo {
        path: Some("/dev/sda".to_string()),
        size: Some(Sectors(1 << 20)),
        logical_sector_size: Some(512),
        label: Some("gpt".to_string()),
        ..DiskInfo::default()
    };
    let config = ProvisionConfig::default();
    let ctx = ExecContext::simulated();

    let err = Provisioner::new(&config, ctx.clone())
        .with_fixture(fixture)
        .run()
        .unwrap_err();

    // 500 MiB + 2000 MiB do not fit into 512 MiB
    let cause = err
        .chain()
        .find_map(|e| e.downcast_ref::<ProvisionError>())
        .unwrap();
    assert!(matches!(cause, ProvisionError::CapacityExceeded { .. }));
    assert!(!ctx.journal().iter().any(|l| l.starts_with("pacstrap")));
    assert!(!ctx.journal().iter().any(|l| l.starts_with("mkfs")));
}

#[test]
fn test_prepare_disk_without_wipe_keeps_label() {
    let config = ProvisionConfig {
        wipe: false,
        ..ProvisionConfig::default()
    };
    let ctx = ExecContext::simulated();
    Provisioner::new(&config, ctx.clone()).prepare_disk().unwrap();

    let journal = ctx.journal();
    assert!(!journal.iter().any(|l| l.starts_with("wipefs")));
    assert_eq!(journal.iter().filter(|l| l.contains(" mklabel ")).count(), 1);
}
