#[rocket::launch]
fn rocket() -> _ {
    everato_api::rocket()
}
