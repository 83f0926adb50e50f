use clap::Subcommand;

use super::{CliResult, Context};

#[derive(Subcommand)]
pub enum TaskAction {
    /// Add a task
    Add {
        /// Task title
        title: String,
        /// Project ID
        #[arg(long)]
        project: Option<String>,
    },
    /// List tasks as JSON
    List,
}

pub fn run(action: TaskAction) -> CliResult {
    let ctx = Context::open()?;
    match action {
        TaskAction::Add { title, project } => {
            let task = ctx.db.add_task(&title, project.as_deref())?;
            println!("{}", serde_json::to_string_pretty(&task)?);
        }
        TaskAction::List => {
            let tasks = ctx.db.list_tasks()?;
            println!("{}", serde_json::to_string_pretty(&tasks)?);
        }
    }
    Ok(())
}
