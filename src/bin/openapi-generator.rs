//! Print the relay's OpenAPI document as pretty JSON.

use bunker_lobby::routes::docs;

fn main() -> anyhow::Result<()> {
    println!("{}", docs::openapi().to_pretty_json()?);
    Ok(())
}
