//! Pet store on apiary: per-endpoint middleware, path variables and
//! JSON-API errors.
//!
//! Run with:
//!   RUST_LOG=info cargo run --example petstore
//!   APIARY_BACKEND=axum RUST_LOG=debug cargo run --example petstore
//!
//! Try:
//!   curl -i -X OPTIONS http://localhost:3000/v1/pets
//!   curl -i http://localhost:3000/v1/pets?tag=cat,dog
//!   curl -i -X POST http://localhost:3000/v1/pets -d '{"name":"moufassa"}'
//!   curl -i -X POST http://localhost:3000/v1/pets \
//!        -H 'authorization: Bearer demo' -d '{"name":"moufassa"}'
//!   curl -i -X PUT http://localhost:3000/v1/pets/7 \
//!        -H 'authorization: Bearer demo' -d '{"name":"simba"}'
//!   curl -i -X POST http://localhost:3000/v1/pets/7/photo \
//!        -H 'authorization: Bearer demo' -F caption=sunny -F photo=@cat.jpg

use apiary::middleware::{Deadline, RequireParams};
use apiary::{AnyRouter, Api, BackendKind, Chain, Error, Options, Req, Response, Server, StatusCode};
use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Serialize, Deserialize)]
struct Pet {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    id: String,
    name: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let kind: BackendKind = std::env::var("APIARY_BACKEND")
        .unwrap_or_else(|_| "native".to_owned())
        .parse()?;

    let mut api = Api::new(Options::new().base_path("/v1"));
    api.use_middleware(Deadline::after(std::time::Duration::from_secs(5)));

    api.register("GET", "/pets", Chain::new(), list_pets)?
        .register("POST", "/pets", Chain::new().with(authenticate), create_pet)?
        .register("PUT", "/pets/{id}", Chain::new().with(authenticate), update_pet)?
        .register(
            "POST",
            "/pets/{id}/photo",
            Chain::new().with(authenticate).with(RequireParams::new(["caption"])),
            upload_photo,
        )?;

    let mut router = AnyRouter::new(kind);
    api.activate(router.as_backend())?;

    match router {
        AnyRouter::Native(router) => Server::bind("0.0.0.0:3000")?.serve(router).await?,
        AnyRouter::Axum(router) => {
            let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
            axum::serve(listener, router).await?;
        }
    }
    Ok(())
}

fn authenticate(req: &mut Req) -> Result<(), Error> {
    let token = req
        .header("authorization")
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| Error::new(401, "not authenticated").with_code("missing_token"))?
        .to_owned();
    req.context.set("user", token);
    Ok(())
}

async fn list_pets(req: Req) -> Response {
    let tags = req.params.get_all("tag");
    Response::json(format!(r#"{{"tags":{}}}"#, serde_json::json!(tags)).into_bytes())
}

async fn create_pet(req: Req) -> Result<Response, Error> {
    let mut pet: Pet = req.decode().map_err(|e| Error::wrap(e, 422))?;
    pet.id = "7".to_owned();
    let body = serde_json::to_vec(&pet).map_err(|e| Error::wrap(e, 500))?;
    Ok(Response::builder()
        .status(StatusCode::CREATED)
        .header("location", "/v1/pets/7")
        .json(body))
}

async fn update_pet(req: Req) -> Result<Response, Error> {
    let mut pet: Pet = req.decode().map_err(|e| Error::wrap(e, 422))?;
    pet.id = req.param("id").unwrap_or_default().to_owned();
    let body = serde_json::to_vec(&pet).map_err(|e| Error::wrap(e, 500))?;
    Ok(Response::json(body))
}

async fn upload_photo(req: Req) -> Result<Response, Error> {
    let photo = req
        .params
        .files
        .get("photo")
        .and_then(|f| f.first())
        .ok_or_else(|| Error::new(400, "photo is required").with_path("photo"))?;
    let user = req.context.get_str("user").unwrap_or_default();
    Ok(Response::json(
        serde_json::json!({
            "pet": req.param("id"),
            "caption": req.params.get("caption"),
            "file": photo.file_name,
            "size": photo.size,
            "on_disk": photo.is_spilled(),
            "by": user,
        })
        .to_string()
        .into_bytes(),
    ))
}
