use clap::Args;

use crate::cli::GlobalFlags;
use crate::wire::{ContainerConfig, CreateContainerRequest, CreateContainerResponse, HostConfig, PortBinding};

#[derive(Args, Debug)]
pub struct CreateArgs {
    /// Name for the new container.
    #[arg(long)]
    pub name: Option<String>,

    /// Image reference to create the container from.
    pub image: String,

    /// Command and arguments to run in place of the image's default.
    #[arg(trailing_var_arg = true)]
    pub cmd: Vec<String>,

    /// Environment variables, `KEY=VALUE`, may be repeated.
    #[arg(short, long = "env")]
    pub env: Vec<String>,

    /// Publish a container port to the host, `host:container[/proto]`.
    #[arg(short = 'p', long = "publish")]
    pub publish: Vec<String>,

    /// Link to another container, `name[:alias]`.
    #[arg(long = "link")]
    pub links: Vec<String>,

    /// Allocate a pseudo-tty.
    #[arg(short, long)]
    pub tty: bool,

    /// Keep stdin open even if not attached.
    #[arg(short = 'i', long = "interactive")]
    pub interactive: bool,
}

pub async fn execute(args: CreateArgs, global: &GlobalFlags) -> anyhow::Result<()> {
    let client = global.connect()?;

    let mut port_bindings = Vec::new();
    for spec in &args.publish {
        port_bindings.push(parse_publish(spec)?);
    }

    let req = CreateContainerRequest {
        image: args.image.clone(),
        config: ContainerConfig {
            image: args.image,
            cmd: args.cmd,
            env: args.env,
            tty: args.tty,
            open_stdin: args.interactive,
            ..ContainerConfig::default()
        },
        host_config: HostConfig {
            port_bindings,
            links: args.links,
            ..HostConfig::default()
        },
    };

    let query = match &args.name {
        Some(name) => format!("/containers/create?name={name}"),
        None => "/containers/create".to_string(),
    };
    let resp: CreateContainerResponse = client.post_json(&query, &req).await?;
    println!("{}", resp.id);
    Ok(())
}

/// Parse `host[:proto]:container[/proto]` or `host:container` publish specs.
fn parse_publish(spec: &str) -> anyhow::Result<PortBinding> {
    let (host_part, container_part) = spec
        .split_once(':')
        .ok_or_else(|| anyhow::anyhow!("invalid --publish {spec:?}, expected host:container[/proto]"))?;
    let (container_port, protocol) = match container_part.split_once('/') {
        Some((port, proto)) => (port, proto.to_lowercase()),
        None => (container_part, "tcp".to_string()),
    };
    Ok(PortBinding {
        protocol,
        container_port: container_port
            .parse()
            .map_err(|_| anyhow::anyhow!("invalid container port in {spec:?}"))?,
        host_ip: None,
        host_port: host_part
            .parse()
            .map_err(|_| anyhow::anyhow!("invalid host port in {spec:?}"))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_tcp_publish() {
        let binding = parse_publish("8080:80").unwrap();
        assert_eq!(binding.host_port, 8080);
        assert_eq!(binding.container_port, 80);
        assert_eq!(binding.protocol, "tcp");
    }

    #[test]
    fn parses_explicit_protocol() {
        let binding = parse_publish("53:53/udp").unwrap();
        assert_eq!(binding.protocol, "udp");
        assert_eq!(binding.container_port, 53);
    }

    #[test]
    fn lowercases_protocol() {
        let binding = parse_publish("80:80/TCP").unwrap();
        assert_eq!(binding.protocol, "tcp");
    }

    #[test]
    fn rejects_missing_colon() {
        assert!(parse_publish("8080").is_err());
    }

    #[test]
    fn rejects_non_numeric_port() {
        assert!(parse_publish("abc:80").is_err());
        assert!(parse_publish("8080:xyz").is_err());
    }

    #[rstest::rstest]
    #[case("80:80", "tcp", 80, 80)]
    #[case("8080:80/tcp", "tcp", 80, 8080)]
    #[case("5353:53/udp", "udp", 53, 5353)]
    fn parses_publish_cases(
        #[case] spec: &str,
        #[case] protocol: &str,
        #[case] container_port: u16,
        #[case] host_port: u16,
    ) {
        let binding = parse_publish(spec).unwrap();
        assert_eq!(binding.protocol, protocol);
        assert_eq!(binding.container_port, container_port);
        assert_eq!(binding.host_port, host_port);
    }
}
