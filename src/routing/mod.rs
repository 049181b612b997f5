pub mod pattern;
pub mod table;

pub use pattern::{normalize_path, RoutePattern};
pub use table::{Route, RouteMatch, RouteTable};

/// Every page and form endpoint the front controller dispatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Home,
    ShowLogin,
    Login,
    ShowRegister,
    Register,
    Logout,
    Dashboard,
    ChartData,
    TicketIndex,
    TicketCreate,
    TicketStore,
    TicketShow,
    TicketEdit,
    TicketUpdate,
    TicketDelete,
    TicketComment,
    ShowProfile,
    UpdateProfile,
}

impl Action {
    /// Reachable without a signed-in session.
    pub fn is_public(&self) -> bool {
        matches!(
            self,
            Action::Home | Action::ShowLogin | Action::Login | Action::ShowRegister | Action::Register | Action::Logout
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            Action::Home => "home.index",
            Action::ShowLogin => "auth.show_login",
            Action::Login => "auth.login",
            Action::ShowRegister => "auth.show_register",
            Action::Register => "auth.register",
            Action::Logout => "auth.logout",
            Action::Dashboard => "dashboard.index",
            Action::ChartData => "dashboard.chart_data",
            Action::TicketIndex => "tickets.index",
            Action::TicketCreate => "tickets.create",
            Action::TicketStore => "tickets.store",
            Action::TicketShow => "tickets.show",
            Action::TicketEdit => "tickets.edit",
            Action::TicketUpdate => "tickets.update",
            Action::TicketDelete => "tickets.delete",
            Action::TicketComment => "tickets.add_comment",
            Action::ShowProfile => "auth.show_profile",
            Action::UpdateProfile => "auth.update_profile",
        }
    }
}

pub fn build_routes() -> RouteTable<Action> {
    RouteTable::new()
        .get("/", Action::Home)
        // Authentication
        .get("/login", Action::ShowLogin)
        .post("/login", Action::Login)
        .get("/register", Action::ShowRegister)
        .post("/register", Action::Register)
        .get("/logout", Action::Logout)
        // Dashboard
        .get("/dashboard", Action::Dashboard)
        .get("/dashboard/chart-data", Action::ChartData)
        // Tickets
        .get("/tickets", Action::TicketIndex)
        .get("/tickets/create", Action::TicketCreate)
        .post("/tickets", Action::TicketStore)
        .get("/tickets/{id}", Action::TicketShow)
        .get("/tickets/{id}/edit", Action::TicketEdit)
        .post("/tickets/{id}/update", Action::TicketUpdate)
        .post("/tickets/{id}/delete", Action::TicketDelete)
        .post("/tickets/{id}/comments", Action::TicketComment)
        // Profile
        .get("/profile", Action::ShowProfile)
        .post("/profile", Action::UpdateProfile)
}
