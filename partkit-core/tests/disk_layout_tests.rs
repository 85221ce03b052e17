use partkit_core::{logging, Backend, Disk, DiskConfig, LayoutError};
use partkit_hal::{FakeHal, Operation};
use std::path::Path;
use std::sync::Arc;

const MSDOS_PRINT: &str = "BYT;
/dev/loop0:50593792s:loopback:512:512:msdos:Loopback device:;
1:2048s:98303s:96256s:ext4::type=83;
2:98304s:29394943s:29296640s:ext4::boot, type=83;
3:29394944s:45019135s:15624192s:ext4::type=83;
4:45019136s:50331647s:5312512s:ext4::type=83;";

const EMPTY_GPT_PRINT: &str = "BYT;
/dev/loop0:2097152s:loopback:512:512:gpt:Loopback device:;";

const SGDISK_PRINT: &str = "Disk /dev/sda: 500118192 sectors, 238.5 GiB
Model: Samsung SSD 850
Sector size (logical/physical): 512/512 bytes
Disk identifier (GUID): 8B5F3D0B-6A2C-4E0F-9C11-2D3E4F506172
Partition table holds up to 128 entries
Main partition table begins at sector 2 and ends at sector 33
First usable sector is 34, last usable sector is 500118158
Partitions will be aligned on 2048-sector boundaries
Total free space is 495716973 sectors (236.4 GiB)

Number  Start (sector)    End (sector)  Size       Code  Name
   1            2048          206847   100.0 MiB   EF00  EFI
   2          206848         4401151   2.0 GiB     8300  root
";

fn parted_cmd(verbs: &[&str]) -> Vec<String> {
    let mut cmd: Vec<String> = ["parted", "--script", "--machine", "--", "/some/device", "unit", "s"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    cmd.extend(verbs.iter().map(|s| s.to_string()));
    cmd
}

fn cmd(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

fn parted_disk(hal: &FakeHal) -> Disk {
    Disk::new("/some/device", Arc::new(hal.clone()))
}

#[test]
fn creates_a_new_partition_table() {
    logging::init_for_tests();
    let hal = FakeHal::new();
    hal.set_output("parted", EMPTY_GPT_PRINT);
    let mut dev = parted_disk(&hal);

    dev.new_partition_table("gpt").unwrap();

    assert_eq!(
        hal.commands(),
        vec![
            parted_cmd(&["mklabel", "gpt"]),
            cmd(&["partx", "-u", "/some/device"]),
            parted_cmd(&["print"]),
        ]
    );
    assert_eq!(dev.label(), "gpt");
    assert_eq!(dev.sector_size(), 512);
}

#[test]
fn invalid_table_label_touches_nothing() {
    let hal = FakeHal::new();
    let mut dev = parted_disk(&hal);
    let err = dev.new_partition_table("bsd").unwrap_err();
    assert!(matches!(err, LayoutError::UnsupportedTableLabel { .. }));
    assert_eq!(hal.operation_count(), 0);
}

#[test]
fn failed_flush_keeps_cached_state() {
    let hal = FakeHal::new();
    hal.set_output("parted", MSDOS_PRINT);
    let mut dev = parted_disk(&hal);
    dev.reload().unwrap();

    hal.fail_command_with_output("parted", Some("mklabel"), "Error: Partition(s) on /some/device are being used.");
    let err = dev.new_partition_table("gpt").unwrap_err();
    assert_eq!(
        err.output(),
        Some("Error: Partition(s) on /some/device are being used.")
    );
    assert_eq!(dev.label(), "msdos");
    assert_eq!(dev.partitions().len(), 4);
}

#[test]
fn adds_a_partition_after_the_last_one() {
    let hal = FakeHal::new();
    hal.set_output("parted", MSDOS_PRINT);
    let mut dev = parted_disk(&hal);

    let num = dev.add_partition(0, "ext4", "ignored", &["boot"]).unwrap();

    assert_eq!(num, 5);
    assert_eq!(
        hal.commands(),
        vec![
            parted_cmd(&["print"]),
            parted_cmd(&[
                "mkpart", "primary", "ext4", "50331648", "100%", "set", "5", "boot", "on",
            ]),
            cmd(&["partx", "-u", "/some/device"]),
            parted_cmd(&["print"]),
        ]
    );
}

#[test]
fn add_partition_checks_free_space_before_running_tools() {
    let hal = FakeHal::new();
    hal.set_output("parted", MSDOS_PRINT);
    let mut dev = parted_disk(&hal);

    assert!(dev.check_disk_free_space_mib(128));
    assert!(!dev.check_disk_free_space_mib(130));

    let err = dev.add_partition(130, "ext4", "", &[]).unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("266240"), "{msg}");
    assert!(msg.contains("262145"), "{msg}");
    // Only the initial load ran.
    assert_eq!(hal.commands(), vec![parted_cmd(&["print"])]);
}

#[test]
fn expands_last_ext4_partition() {
    let hal = FakeHal::new();
    hal.set_output("parted", MSDOS_PRINT);
    hal.set_output("blkid", "ext4\n");
    hal.add_path("/some/device4");
    let mut dev = parted_disk(&hal);

    dev.expand_last_partition(0).unwrap();

    assert_eq!(
        hal.commands(),
        vec![
            parted_cmd(&["print"]),
            parted_cmd(&["rm", "4", "mkpart", "primary", "45019136", "100%"]),
            cmd(&["partx", "-u", "/some/device"]),
            parted_cmd(&["print"]),
            cmd(&["udevadm", "settle"]),
            cmd(&["blkid", "/some/device4", "-s", "TYPE", "-o", "value"]),
            cmd(&["e2fsck", "-fy", "/some/device4"]),
            cmd(&["resize2fs", "/some/device4"]),
        ]
    );
}

#[test]
fn expands_last_xfs_partition_through_a_temporary_mount() {
    let hal = FakeHal::new();
    hal.set_output("parted", MSDOS_PRINT);
    hal.set_output("blkid", "xfs");
    hal.add_path("/some/device4");
    let mut dev = parted_disk(&hal);

    dev.expand_last_partition(0).unwrap();

    let ops = hal.operations();
    let mounted: Vec<_> = ops
        .iter()
        .filter_map(|op| match op {
            Operation::Mount {
                device,
                target,
                fstype,
            } => Some((device.clone(), target.clone(), fstype.clone())),
            _ => None,
        })
        .collect();
    assert_eq!(mounted.len(), 1);
    let (device, target, fstype) = &mounted[0];
    assert_eq!(device, Path::new("/some/device4"));
    assert_eq!(fstype.as_deref(), Some("auto"));

    let last_cmd = hal.commands().last().cloned().unwrap();
    assert_eq!(
        last_cmd,
        vec!["xfs_growfs".to_string(), target.to_string_lossy().into_owned()]
    );
    assert_eq!(
        ops.last(),
        Some(&Operation::Unmount {
            target: target.clone()
        })
    );
}

#[test]
fn expand_fails_when_partition_device_never_appears() {
    let hal = FakeHal::new();
    hal.set_output("parted", MSDOS_PRINT);
    let mut dev = parted_disk(&hal);

    let err = dev.expand_last_partition(0).unwrap_err();

    assert!(matches!(err, LayoutError::PartitionDeviceNotFound { number: 4, .. }));
    assert_eq!(hal.sleep_count(), 9);
    assert!(!hal.commands().iter().any(|c| c[0] == "blkid"));
}

#[test]
fn formats_a_partition_by_number() {
    let hal = FakeHal::new();
    hal.add_path("/some/device1");
    let dev = parted_disk(&hal);

    dev.format_partition(1, "vfat", "EFI").unwrap();

    assert_eq!(
        hal.commands(),
        vec![
            cmd(&["udevadm", "settle"]),
            cmd(&["mkfs.vfat", "-n", "EFI", "/some/device1"]),
        ]
    );
}

#[test]
fn gdisk_backend_validates_with_pretend_run() {
    let hal = FakeHal::new();
    hal.set_output("sgdisk", SGDISK_PRINT);
    let mut dev = Disk::new("/dev/sda", Arc::new(hal.clone())).with_backend(Backend::Gdisk);

    let num = dev.add_partition(1024, "ext4", "data", &[]).unwrap();

    assert_eq!(num, 3);
    assert_eq!(
        hal.commands(),
        vec![
            cmd(&["sgdisk", "-p", "/dev/sda"]),
            cmd(&["sgdisk", "-P", "-n=3:4401152:+2097152", "-c=3:data", "-t=3:8300", "/dev/sda"]),
            cmd(&["sgdisk", "-n=3:4401152:+2097152", "-c=3:data", "-t=3:8300", "/dev/sda"]),
            cmd(&["partprobe", "/dev/sda"]),
            cmd(&["sgdisk", "-p", "/dev/sda"]),
        ]
    );
}

#[test]
fn gdisk_rejected_pretend_run_leaves_disk_untouched() {
    let hal = FakeHal::new();
    hal.set_output("sgdisk", SGDISK_PRINT);
    hal.fail_command_with_output("sgdisk", Some("-P"), "Could not create partition 3");
    let mut dev = Disk::new("/dev/sda", Arc::new(hal.clone())).with_backend(Backend::Gdisk);

    let err = dev.add_partition(1024, "ext4", "data", &[]).unwrap_err();

    assert_eq!(err.output(), Some("Could not create partition 3"));
    let sgdisk_runs: Vec<Vec<String>> = hal
        .commands()
        .into_iter()
        .filter(|c| c[0] == "sgdisk" && c[1] != "-p")
        .collect();
    assert_eq!(sgdisk_runs.len(), 1);
    assert_eq!(sgdisk_runs[0][1], "-P");
    assert_eq!(dev.partitions().len(), 2);
}

#[test]
fn gdisk_backend_refuses_msdos_tables() {
    let hal = FakeHal::new();
    let mut dev = Disk::new("/dev/sda", Arc::new(hal.clone())).with_backend(Backend::Gdisk);
    assert!(matches!(
        dev.new_partition_table("msdos"),
        Err(LayoutError::UnsupportedTableLabel { .. })
    ));
    assert_eq!(hal.operation_count(), 0);
}

#[test]
fn disk_from_config_uses_its_settings() {
    let config = DiskConfig::parse(
        "device = \"/some/device\"\nbackend = \"parted\"\npartition_tries = 2\nretry_delay_ms = 10\n",
    )
    .unwrap();
    let hal = FakeHal::new();
    let dev = Disk::from_config(&config, Arc::new(hal.clone()));

    assert_eq!(dev.backend(), Backend::Parted);
    assert!(dev.find_partition_device(7).is_err());
    assert_eq!(hal.commands().len(), 2);
    assert!(hal.has_operation(|op| matches!(op, Operation::Sleep { millis: 10 })));
}
