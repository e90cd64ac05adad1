use sandbox::TaskSpec;

/// Arguments for `docker create` (without the binary itself).
///
/// Containers get an init process and an open stdin. Networking and the
/// log driver are off unless the task enables them; swap is capped to the
/// memory limit.
pub fn create_args(spec: &TaskSpec) -> Vec<String> {
    let mut args: Vec<String> = vec!["create".into(), "-i".into(), "--init".into()];

    if !spec.limits.cpuset.is_empty() {
        let cpus: Vec<String> = spec.limits.cpuset.iter().map(u32::to_string).collect();
        args.push(format!("--cpuset-cpus={}", cpus.join(",")));
    }
    if !spec.enable_network {
        args.push("--net=none".into());
    }
    if !spec.enable_logging_driver {
        args.push("--log-driver=none".into());
    }
    if let Some(mb) = spec.limits.memory_mb {
        args.push(format!("--memory={mb}m"));
        args.push(format!("--memory-swap={mb}m"));
    }
    if let Some(pids) = spec.limits.pids {
        args.push("--pids-limit".into());
        args.push(pids.to_string());
    }
    if let Some(stack) = spec.limits.stack.ulimit_value() {
        args.push("--ulimit".into());
        args.push(format!("stack={stack}:{stack}"));
    }
    if let Some(workdir) = &spec.workdir {
        args.push("-w".into());
        args.push(workdir.clone());
    }
    for volume in &spec.volumes {
        args.push("-v".into());
        let mut mount = format!("{}:{}", volume.volume, volume.container_path);
        if volume.read_only {
            mount.push_str(":ro");
        }
        args.push(mount);
    }
    for bind in &spec.binds {
        args.push("--mount".into());
        let mut mount = format!(
            "type=bind,src={},dst={}",
            bind.host_path.display(),
            bind.container_path
        );
        if bind.read_only {
            mount.push_str(",readonly");
        }
        args.push(mount);
    }
    if let Some(parent) = &spec.cgroup_parent {
        args.push(format!("--cgroup-parent={parent}"));
    }

    args.push(spec.image.clone());
    args.extend(spec.args.iter().cloned());
    args
}
