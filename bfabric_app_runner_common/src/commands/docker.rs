//! Command lines for `docker` commands.

use crate::prelude::*;
use crate::process::CommandLine;
use crate::specs::commands::{split_command, DockerCommand, MountOptions};

/// Where a shared LIMS config file is mounted inside containers.
const CONTAINER_CONFIG_PATH: &str = "/home/user/.bfabricpy.yml";

/// A bind mount.
#[derive(Debug, PartialEq)]
struct Mount {
    source: PathBuf,
    target: PathBuf,
    read_only: bool,
}

impl Mount {
    fn argument(&self) -> String {
        let mut arg = format!(
            "type=bind,source={},target={}",
            self.source.display(),
            self.target.display()
        );
        if self.read_only {
            arg.push_str(",readonly");
        }
        arg
    }
}

/// Expand a leading `~` and make `path` absolute relative to `base`.
fn host_path(path: &Path, base: &Path) -> PathBuf {
    let expanded = match path.strip_prefix("~") {
        Ok(rest) => match std::env::var_os("HOME") {
            Some(home) => PathBuf::from(home).join(rest),
            None => path.to_owned(),
        },
        Err(_) => path.to_owned(),
    };
    base.join(expanded)
}

fn collect_mounts(options: &MountOptions, work_dir: &Path) -> Vec<Mount> {
    let mut mounts = vec![];
    if options.share_bfabric_config {
        mounts.push(Mount {
            source: host_path(Path::new("~/.bfabricpy.yml"), work_dir),
            target: PathBuf::from(CONTAINER_CONFIG_PATH),
            read_only: true,
        });
    }
    mounts.push(Mount {
        source: work_dir.to_owned(),
        target: options
            .work_dir_target
            .clone()
            .unwrap_or_else(|| work_dir.to_owned()),
        read_only: false,
    });
    let extra = options
        .read_only
        .iter()
        .map(|m| (m, true))
        .chain(options.writeable.iter().map(|m| (m, false)));
    for ((source, target), read_only) in extra {
        mounts.push(Mount {
            source: host_path(source, work_dir),
            target: target.clone(),
            read_only,
        });
    }
    mounts
}

/// Build the `<engine> run` command line for `docker`, running as `user`
/// (`uid:gid`) with `work_dir` mounted. Relative mount sources are
/// resolved against `work_dir`.
pub fn docker_command_line(
    docker: &DockerCommand,
    args: &[String],
    work_dir: &Path,
    user: &str,
) -> Result<CommandLine> {
    let mut argv: Vec<String> = vec![
        "run".to_owned(),
        "--user".to_owned(),
        user.to_owned(),
        "--rm".to_owned(),
    ];
    for mount in collect_mounts(&docker.mounts, work_dir) {
        argv.push("--mount".to_owned());
        argv.push(mount.argument());
    }
    if let Some(entrypoint) = &docker.entrypoint {
        argv.push("--entrypoint".to_owned());
        argv.push(entrypoint.clone());
    }
    for (key, value) in &docker.env {
        argv.push("--env".to_owned());
        argv.push(format!("{}={}", key, value));
    }
    if let Some(mac_address) = &docker.mac_address {
        argv.push("--mac-address".to_owned());
        argv.push(mac_address.clone());
    }
    argv.extend(docker.custom_args.iter().cloned());
    if let Some(hostname) = &docker.hostname {
        argv.push("--hostname".to_owned());
        argv.push(hostname.clone());
    }
    argv.push(docker.image.clone());
    argv.extend(split_command(&docker.command)?);
    argv.extend(args.iter().cloned());
    Ok(CommandLine::new(docker.engine.as_str(), argv))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_container_command_lines() {
        let docker: DockerCommand = serde_yaml::from_str(
            r#"
image: registry.example.org/app:1.2
command: "/app/run --fast"
engine: podman
entrypoint: /bin/sh
env: {A: "1", B: two words}
mac_address: "02:42:ac:11:00:02"
hostname: worker
custom_args: ["--network", "host"]
mounts:
  share_bfabric_config: false
  read_only: [["/data/refs", "/refs"]]
  writeable: [["scratch", "/scratch"]]
"#,
        )
        .unwrap();
        let cmd = docker_command_line(
            &docker,
            &["/work/chunk".to_owned()],
            Path::new("/work"),
            "1000:100",
        )
        .unwrap();
        let expected: Vec<String> = vec![
            "podman",
            "run",
            "--user",
            "1000:100",
            "--rm",
            "--mount",
            "type=bind,source=/work,target=/work",
            "--mount",
            "type=bind,source=/data/refs,target=/refs,readonly",
            "--mount",
            "type=bind,source=/work/scratch,target=/scratch",
            "--entrypoint",
            "/bin/sh",
            "--env",
            "A=1",
            "--env",
            "B=two words",
            "--mac-address",
            "02:42:ac:11:00:02",
            "--network",
            "host",
            "--hostname",
            "worker",
            "registry.example.org/app:1.2",
            "/app/run",
            "--fast",
            "/work/chunk",
        ]
        .into_iter()
        .map(str::to_owned)
        .collect();
        assert_eq!(cmd.argv(), expected);
    }

    #[test]
    fn shares_config_and_remaps_work_dir() {
        let docker: DockerCommand = serde_yaml::from_str(
            "image: app\ncommand: run\nmounts: {work_dir_target: /mnt/work}\n",
        )
        .unwrap();
        let mounts = collect_mounts(&docker.mounts, Path::new("/work"));
        assert_eq!(mounts.len(), 2);
        assert_eq!(mounts[0].target, PathBuf::from(CONTAINER_CONFIG_PATH));
        assert!(mounts[0].read_only);
        assert!(mounts[0].source.ends_with(".bfabricpy.yml"));
        assert_eq!(
            mounts[1].argument(),
            "type=bind,source=/work,target=/mnt/work"
        );

        let cmd = docker_command_line(&docker, &[], Path::new("/work"), "0:0").unwrap();
        assert_eq!(cmd.program, "docker");
        assert_eq!(cmd.args.last().map(String::as_str), Some("run"));
    }
}
