#[actix_web::main]
async fn main() -> std::io::Result<()> {
    equipment_summary_lib::run().await
}
