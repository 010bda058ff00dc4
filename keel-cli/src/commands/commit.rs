use clap::Args;

use crate::cli::GlobalFlags;
use crate::wire::CommitResponse;

#[derive(Args, Debug)]
pub struct CommitArgs {
    /// Name or ID of the container to commit.
    pub container: String,

    /// Repository and optional tag for the resulting image, `repo[:tag]`.
    pub repository: Option<String>,

    /// Commit message.
    #[arg(short, long)]
    pub message: Option<String>,

    /// Author, e.g. `"Jane Doe <jane@example.com>"`.
    #[arg(short, long)]
    pub author: Option<String>,
}

pub async fn execute(args: CommitArgs, global: &GlobalFlags) -> anyhow::Result<()> {
    let client = global.connect()?;

    let mut query = format!("container={}", args.container);
    if let Some(repository) = &args.repository {
        let (repo, tag) = match repository.split_once(':') {
            Some((repo, tag)) => (repo, Some(tag)),
            None => (repository.as_str(), None),
        };
        query.push_str(&format!("&repo={repo}"));
        if let Some(tag) = tag {
            query.push_str(&format!("&tag={tag}"));
        }
    }
    if let Some(author) = &args.author {
        query.push_str(&format!("&author={author}"));
    }
    if let Some(message) = &args.message {
        query.push_str(&format!("&comment={message}"));
    }

    let resp: CommitResponse = client
        .post_json(&format!("/commit?{query}"), &serde_json::Value::Null)
        .await?;
    println!("{}", resp.id);
    Ok(())
}
