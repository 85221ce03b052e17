/// Partition path helper for block devices.
///
/// Devices whose name ends in a digit (nvme0n1, mmcblk0, loop0) get a `p` separator.
pub fn partition_path(disk: &str, num: u32) -> String {
    if disk.ends_with(|c: char| c.is_ascii_digit()) {
        format!("{}p{}", disk, num)
    } else {
        format!("{}{}", disk, num)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_disks_append_number() {
        assert_eq!(partition_path("/dev/sda", 2), "/dev/sda2");
        assert_eq!(partition_path("/some/device", 4), "/some/device4");
    }

    #[test]
    fn digit_terminated_disks_use_p_separator() {
        assert_eq!(partition_path("/dev/nvme0n1", 1), "/dev/nvme0n1p1");
        assert_eq!(partition_path("/dev/mmcblk0", 3), "/dev/mmcblk0p3");
        assert_eq!(partition_path("/dev/loop7", 1), "/dev/loop7p1");
    }
}
