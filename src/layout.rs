use camino::{Utf8Path, Utf8PathBuf};

/// Source and output directory layout of the site.
///
/// The defaults mirror the classic starter-kit structure: page templates in
/// `templates/`, Sass sources in `style/`, JavaScript in `src/`, raw images
/// in `assets/img/`, everything emitted into `dist/`.
#[derive(Debug, Clone)]
pub struct Layout {
    /// Root of static pages and templates.
    pub templates: Utf8PathBuf,
    /// Root of Sass/SCSS sources.
    pub styles: Utf8PathBuf,
    /// Root of JavaScript sources.
    pub scripts: Utf8PathBuf,
    /// Bundle entry point, resolved by the bundler.
    pub script_entry: Utf8PathBuf,
    /// Root of source images.
    pub images: Utf8PathBuf,
    /// Output root.
    pub dist: Utf8PathBuf,
    /// Port of the static dev server.
    pub http_port: u16,
}

impl Default for Layout {
    fn default() -> Self {
        Self {
            templates: "templates".into(),
            styles: "style".into(),
            scripts: "src".into(),
            script_entry: "src/app.js".into(),
            images: "assets/img".into(),
            dist: "dist".into(),
            http_port: 3000,
        }
    }
}

impl Layout {
    /// Root the layout at `base` instead of the current working directory.
    pub fn rooted(base: impl AsRef<Utf8Path>) -> Self {
        let base = base.as_ref();
        let layout = Layout::default();
        Self {
            templates: base.join(layout.templates),
            styles: base.join(layout.styles),
            scripts: base.join(layout.scripts),
            script_entry: base.join(layout.script_entry),
            images: base.join(layout.images),
            dist: base.join(layout.dist),
            http_port: layout.http_port,
        }
    }

    pub fn assets_dir(&self) -> Utf8PathBuf {
        self.dist.join("assets")
    }

    pub fn css_dir(&self) -> Utf8PathBuf {
        self.assets_dir().join("css")
    }

    pub fn js_dir(&self) -> Utf8PathBuf {
        self.assets_dir().join("js")
    }

    pub fn img_dir(&self) -> Utf8PathBuf {
        self.assets_dir().join("img")
    }

    /// Manifest mapping original asset paths to their fingerprinted names.
    pub fn manifest_path(&self) -> Utf8PathBuf {
        self.dist.join("manifest.json")
    }

    pub fn page_glob(&self) -> String {
        format!("{}/**/*.html", self.templates)
    }

    pub fn template_glob(&self) -> String {
        format!("{}/**/*.twig", self.templates)
    }

    pub fn style_globs(&self) -> Vec<String> {
        vec![
            format!("{}/**/*.scss", self.styles),
            format!("{}/**/*.sass", self.styles),
        ]
    }

    pub fn script_glob(&self) -> String {
        format!("{}/**/*.js", self.scripts)
    }

    pub fn image_glob(&self) -> String {
        format!("{}/**/*", self.images)
    }

    /// Intermediate template outputs inside `dist`, pre-normalization.
    pub(crate) fn temp_page_glob(&self) -> String {
        format!("{}/**/*.twig", self.dist)
    }

    pub(crate) fn output_page_glob(&self) -> String {
        format!("{}/**/*.html", self.dist)
    }

    pub(crate) fn asset_glob(&self) -> String {
        format!("{}/**/*", self.assets_dir())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_default_layout() {
        let layout = Layout::default();
        assert_eq!(layout.css_dir(), "dist/assets/css");
        assert_eq!(layout.manifest_path(), "dist/manifest.json");
        assert_eq!(layout.template_glob(), "templates/**/*.twig");
    }

    #[test]
    fn test_rooted_layout() {
        let layout = Layout::rooted("/tmp/site");
        assert_eq!(layout.dist, "/tmp/site/dist");
        assert_eq!(layout.img_dir(), "/tmp/site/dist/assets/img");
        assert_eq!(layout.script_entry, "/tmp/site/src/app.js");
    }
}
