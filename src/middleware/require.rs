use crate::error::Error;
use crate::middleware::Middleware;
use crate::request::Req;

/// Fails with `400` when any of the listed params has no value.
///
/// Path variables are named with their `:` prefix (`":id"`). The error's
/// `path` names the first missing param; `detail` lists all of them.
#[derive(Clone, Debug)]
pub struct RequireParams {
    names: Vec<String>,
}

impl RequireParams {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { names: names.into_iter().map(Into::into).collect() }
    }
}

impl Middleware for RequireParams {
    fn name(&self) -> &str {
        "require_params"
    }

    fn run(&self, req: &mut Req) -> Result<(), Error> {
        let missing = req.params.missing(&self.names);
        let Some(first) = missing.first() else {
            return Ok(());
        };
        Err(Error::new(400, "missing required parameters")
            .with_code("missing_params")
            .with_detail(missing.join(", "))
            .with_path(*first))
    }
}
