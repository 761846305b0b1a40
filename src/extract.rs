//! Request extractors whose rejections go through [`AppError`], so a body or
//! query string that doesn't fit the handler's type gets the same
//! `{error, code}` 400 as any other validation failure.

use axum::extract::{FromRequest, FromRequestParts, Path, Query};
use axum::Json;

use crate::error::AppError;

#[derive(Debug, FromRequest)]
#[from_request(via(Json), rejection(AppError))]
pub struct AppJson<T>(pub T);

#[derive(Debug, FromRequestParts)]
#[from_request(via(Query), rejection(AppError))]
pub struct AppQuery<T>(pub T);

#[derive(Debug, FromRequestParts)]
#[from_request(via(Path), rejection(AppError))]
pub struct AppPath<T>(pub T);
