//! Validating admission webhook for Bundles.
//!
//! The HTTP surface is a single `POST /validate` route mounted on the same
//! actix App as the diagnostics endpoints; TLS termination is left to the
//! deployment in front of it.

use actix_web::{HttpResponse, Responder, post, web};
use kube::core::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview};
use tracing::*;

use crate::bundle_controller::{BUNDLE_KIND, Bundle, validate_bundle};

#[post("/validate")]
pub async fn validate_handler(body: web::Json<AdmissionReview<DynamicObject>>) -> impl Responder {
    let request: AdmissionRequest<DynamicObject> = match body.into_inner().try_into() {
        Ok(request) => request,
        Err(err) => {
            warn!("invalid admission review: {err}");
            return HttpResponse::BadRequest()
                .json(AdmissionResponse::invalid(err.to_string()).into_review());
        }
    };
    HttpResponse::Ok().json(review_bundle(&request).into_review())
}

fn review_bundle(request: &AdmissionRequest<DynamicObject>) -> AdmissionResponse {
    let response = AdmissionResponse::from(request);

    if request.kind.kind != BUNDLE_KIND {
        return response.deny(format!("expected a Bundle, but got a {}", request.kind.kind));
    }

    let Some(object) = &request.object else {
        return response.deny("no object present in admission request");
    };
    let bundle: Bundle = match object.clone().try_parse() {
        Ok(bundle) => bundle,
        Err(err) => return response.deny(format!("failed to parse Bundle: {err}")),
    };

    let validation = validate_bundle(&bundle);
    let mut response = response;
    if !validation.warnings.is_empty() {
        response.warnings = Some(validation.warnings.clone());
    }
    match validation.into_result() {
        Ok(_) => response,
        Err(err) => response.deny(err.to_string()),
    }
}
