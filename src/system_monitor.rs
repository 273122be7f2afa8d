use std::path::{Path, PathBuf};
use std::time::Duration;

use metrics::gauge;
use sysinfo::{Disks, System};
use tokio::time;

/// Samples host memory, CPU and the disk that holds sandbox workspaces.
pub fn start_system_monitor(workspace_root: PathBuf, every: Duration) {
    tokio::spawn(async move {
        let mut system = System::new_all();
        let mut disks = Disks::new_with_refreshed_list();
        let mut interval = time::interval(every);

        loop {
            interval.tick().await;

            system.refresh_memory();
            system.refresh_cpu_all();
            disks.refresh(true);

            gauge!("host_memory_used_bytes").set(system.used_memory() as f64);
            gauge!("host_memory_total_bytes").set(system.total_memory() as f64);
            gauge!("host_cpu_usage_percent").set(system.global_cpu_usage() as f64);

            let mounts = disks
                .list()
                .iter()
                .map(|disk| (disk.mount_point(), disk.available_space(), disk.total_space()))
                .collect::<Vec<_>>();
            match disk_for(&workspace_root, &mounts) {
                Some((free, total)) => {
                    gauge!("workspace_disk_free_bytes").set(free as f64);
                    gauge!("workspace_disk_total_bytes").set(total as f64);
                }
                None => tracing::debug!("no disk found for {}", workspace_root.display()),
            }
        }
    });
}

// Longest mount point that prefixes `path`.
fn disk_for(path: &Path, disks: &[(&Path, u64, u64)]) -> Option<(u64, u64)> {
    disks
        .iter()
        .filter(|(mount, _, _)| path.starts_with(mount))
        .max_by_key(|(mount, _, _)| mount.components().count())
        .map(|(_, free, total)| (*free, *total))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_the_most_specific_mount() {
        let disks = [
            (Path::new("/"), 10, 100),
            (Path::new("/var"), 20, 200),
            (Path::new("/var/lib/gradebox"), 30, 300),
        ];
        assert_eq!(disk_for(Path::new("/var/lib/gradebox/ws"), &disks), Some((30, 300)));
        assert_eq!(disk_for(Path::new("/var/tmp"), &disks), Some((20, 200)));
        assert_eq!(disk_for(Path::new("/srv"), &disks), Some((10, 100)));
        assert_eq!(disk_for(Path::new("/srv"), &disks[1..]), None);
    }
}
